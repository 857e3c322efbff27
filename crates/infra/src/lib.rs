//! Infrastructure layer: state store, run lock, config, external service clients.

pub mod config;
pub mod discord;
mod http;
pub mod lock;
pub mod obsidian;
pub mod state;
pub mod transcribe;

pub use config::{Config, ConfigError};
pub use discord::DiscordClient;
pub use lock::{LockError, RunLock};
pub use obsidian::ObsidianClient;
pub use state::{ItemOutputs, ItemRecord, NewItem, RunRecord, StateStore, StatusSummary, StoreError};
pub use transcribe::{FfmpegNormalizer, WhisperTranscriber};
