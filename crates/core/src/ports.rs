//! Boundaries to external systems.
//!
//! Implementations live in the infrastructure crate; tests use in-memory fakes.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::InboxResult;
use crate::id::MessageId;
use crate::message::{Channel, Message};

/// Chat platform the inbox is read from.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Up to `limit` messages strictly newer than `after`, in any order.
    async fn fetch_messages(
        &self,
        channel_id: &str,
        after: Option<&MessageId>,
        limit: u32,
    ) -> InboxResult<Vec<Message>>;

    async fn get_channel(&self, channel_id: &str) -> InboxResult<Channel>;

    /// Mark a message as handled (adds the completion reaction).
    async fn acknowledge(&self, channel_id: &str, message_id: &MessageId) -> InboxResult<()>;

    /// Download an attachment to `dest`, overwriting it.
    async fn download_attachment(&self, url: &str, dest: &Path) -> InboxResult<()>;

    /// Identity of the authenticated bot, used by health checks.
    async fn whoami(&self) -> InboxResult<String>;
}

/// Note vault the journal entries are written to.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn file_exists(&self, vault_path: &str) -> InboxResult<bool>;
    async fn create_file(&self, vault_path: &str, content: &str) -> InboxResult<()>;
    async fn append_file(&self, vault_path: &str, content: &str) -> InboxResult<()>;
    async fn read_file(&self, vault_path: &str) -> InboxResult<String>;
    /// Ok when the vault API is reachable and the key is accepted.
    async fn health(&self) -> InboxResult<()>;
}

/// Converts downloaded audio into the transcriber's input format.
#[async_trait]
pub trait AudioNormalizer: Send + Sync {
    async fn normalize(&self, input: &Path, output: &Path) -> InboxResult<()>;
    /// Ok when the converter binary is available.
    async fn check(&self) -> InboxResult<()>;
}

/// Output of a transcription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    pub text: String,
    /// File the transcriber left behind, if any.
    pub artifact_path: Option<PathBuf>,
}

/// Speech-to-text engine.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, wav: &Path, out_dir: &Path) -> InboxResult<Transcript>;
    async fn check(&self) -> InboxResult<()>;
}
