//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type InboxResult<T> = Result<T, InboxError>;

/// Maximum number of characters of error text kept on an item record.
pub const MAX_ERROR_CHARS: usize = 1000;

/// Inbox-level error.
///
/// Variants are tagged by cause so callers can pick a state transition without
/// inspecting the message text.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InboxError {
    /// Configuration is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Another invocation holds the run lock.
    #[error("lock error: {0}")]
    Lock(String),

    /// A remote API call failed (transport or non-success status).
    #[error("network error: {0}")]
    Network(String),

    /// A local processing step failed (subprocess, file IO, parse).
    #[error("processing error: {0}")]
    Processing(String),

    /// The state store failed.
    #[error("store error: {0}")]
    Store(String),

    /// Persisted data violates an invariant (unknown status, illegal transition).
    #[error("data integrity error: {0}")]
    Integrity(String),

    /// A deadline expired before the operation completed.
    #[error("deadline exceeded: {0}")]
    Timeout(String),
}

impl InboxError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    pub fn processing(msg: impl Into<String>) -> Self {
        Self::Processing(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::Integrity(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }
}

/// The external step of per-item processing that produced a failure.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Step {
    Download,
    Normalize,
    Transcribe,
    Document,
    Acknowledge,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Download => "download",
            Step::Normalize => "normalize",
            Step::Transcribe => "transcribe",
            Step::Document => "document",
            Step::Acknowledge => "acknowledge",
        }
    }
}

impl core::fmt::Display for Step {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A per-item failure tagged with the step it happened in.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{step} failed: {source}")]
pub struct StepFailure {
    pub step: Step,
    #[source]
    pub source: InboxError,
}

impl StepFailure {
    pub fn new(step: Step, source: InboxError) -> Self {
        Self { step, source }
    }

    /// True when every content step already succeeded and only the
    /// acknowledgment is missing.
    pub fn is_acknowledgment(&self) -> bool {
        self.step == Step::Acknowledge
    }
}

/// Trim and bound error text for persistence.
pub fn truncate_error(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(MAX_ERROR_CHARS) {
        Some((idx, _)) => trimmed[..idx].to_string(),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_error_bounds_length_on_char_boundary() {
        let long = "あ".repeat(MAX_ERROR_CHARS + 10);
        let out = truncate_error(&long);
        assert_eq!(out.chars().count(), MAX_ERROR_CHARS);

        assert_eq!(truncate_error("  boom \n"), "boom");
    }

    #[test]
    fn step_failure_reports_step_and_cause() {
        let failure = StepFailure::new(Step::Acknowledge, InboxError::network("503"));
        assert!(failure.is_acknowledgment());
        assert_eq!(failure.to_string(), "acknowledge failed: network error: 503");

        let failure = StepFailure::new(Step::Download, InboxError::network("404"));
        assert!(!failure.is_acknowledgment());
    }
}
