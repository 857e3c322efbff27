//! Durable state: item records, run audit trail, cursor.

pub mod sqlite;
pub mod types;

pub use sqlite::{
    format_timestamp, StateStore, KEY_LAST_HEALTH_CHECK_AT, KEY_LAST_SEEN_MESSAGE_ID,
    KEY_SCHEMA_VERSION,
};
pub use types::{ItemOutputs, ItemRecord, NewItem, RunCounts, RunRecord, StatusSummary, StoreError};
