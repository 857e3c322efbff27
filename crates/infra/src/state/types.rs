use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use voice_inbox_core::{InboxError, ItemStatus, MessageId};

/// Durable record of one inbox item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemRecord {
    pub message_id: MessageId,
    pub channel_id: String,
    pub author_id: String,
    pub attachment_id: String,
    pub attachment_url: String,
    pub attachment_filename: String,
    pub content_type: String,
    /// Message body, kept so text items can be re-driven without refetching.
    pub message_text: Option<String>,
    pub audio_path: Option<String>,
    pub transcript_path: Option<String>,
    pub status: ItemStatus,
    /// Failure count. Only ever grows.
    pub attempts: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub journal_path: Option<String>,
    pub jump_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Metadata written by Upsert-Pending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewItem {
    pub message_id: MessageId,
    pub channel_id: String,
    pub author_id: String,
    pub attachment_id: String,
    pub attachment_url: String,
    pub attachment_filename: String,
    pub content_type: String,
    pub message_text: Option<String>,
    pub jump_url: Option<String>,
}

/// Paths produced by processing, persisted on completion or acknowledgment failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemOutputs {
    pub journal_path: Option<String>,
    pub audio_path: Option<String>,
    pub transcript_path: Option<String>,
    pub jump_url: Option<String>,
}

/// Audit record of one command invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunRecord {
    pub run_id: String,
    pub command: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub processed: u32,
    pub succeeded: u32,
    pub failed: u32,
}

/// Final counters written when a run is finalized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounts {
    pub processed: u32,
    pub succeeded: u32,
    pub failed: u32,
}

/// Aggregate view used by the `status` command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusSummary {
    pub total: u64,
    pub by_status: BTreeMap<String, u64>,
    pub retry_due: u64,
    pub permanent_failed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen_message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_health_check_at: Option<String>,
}

/// State store error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("database error in {operation}: {message}")]
    Database { operation: String, message: String },
    #[error("state directory error: {0}")]
    Io(String),
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("data integrity error: {0}")]
    Integrity(String),
}

impl From<StoreError> for InboxError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Integrity(msg) => InboxError::Integrity(msg),
            other => InboxError::Store(other.to_string()),
        }
    }
}

pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    let message = match err {
        sqlx::Error::Database(db_err) => db_err.message().to_string(),
        sqlx::Error::PoolClosed => "connection pool closed".to_string(),
        sqlx::Error::RowNotFound => "unexpected row not found".to_string(),
        other => other.to_string(),
    };
    StoreError::Database {
        operation: operation.to_string(),
        message,
    }
}
