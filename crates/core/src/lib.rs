//! `voice-inbox-core` — domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the item status machine, backoff math, the raw message shapes
//! and the collaborator ports the pipeline drives.

pub mod error;
pub mod id;
pub mod message;
pub mod ports;
pub mod retry;
pub mod status;

pub use error::{InboxError, InboxResult, Step, StepFailure};
pub use id::MessageId;
pub use message::{Attachment, Author, Channel, Message};
pub use ports::{AudioNormalizer, DocumentStore, MessageSource, Transcriber, Transcript};
pub use retry::RetryPolicy;
pub use status::ItemStatus;
