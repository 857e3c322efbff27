use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value as JsonValue;

/// Commands the runner executes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Doctor,
    Poll,
    Retry,
    Cleanup,
    Status,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Doctor => "doctor",
            CommandKind::Poll => "poll",
            CommandKind::Retry => "retry",
            CommandKind::Cleanup => "cleanup",
            CommandKind::Status => "status",
        }
    }
}

impl core::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process exit classification of a command result.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Failure,
    Partial,
}

impl ExitStatus {
    pub fn code(&self) -> i32 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::Failure => 1,
            ExitStatus::Partial => 2,
        }
    }
}

/// Aggregated outcome of one command invocation.
///
/// Counters follow the item lifecycle: `processed` counts items that entered
/// processing, `requeued` the failures that got a retry time, `skipped` items
/// that were already done or exhausted their retry budget.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunResult {
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub processed: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub requeued: u32,
    pub skipped: u32,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, JsonValue>,
}

impl RunResult {
    pub fn new(command: CommandKind) -> Self {
        Self {
            command: command.as_str().to_string(),
            ..Self::default()
        }
    }

    /// A result carrying a single fatal error (config, lock contention).
    pub fn fatal(command: CommandKind, error: impl Into<String>) -> Self {
        let mut result = Self::new(command);
        result.record_failure(error);
        result
    }

    pub fn with_data(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.failed += 1;
        self.errors.push(error.into());
    }

    pub fn exit_status(&self) -> ExitStatus {
        match (self.failed, self.succeeded) {
            (0, _) => ExitStatus::Success,
            (_, 0) => ExitStatus::Failure,
            _ => ExitStatus::Partial,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_status_follows_counts() {
        let mut result = RunResult::new(CommandKind::Poll);
        assert_eq!(result.exit_status(), ExitStatus::Success);

        result.record_failure("boom");
        assert_eq!(result.exit_status(), ExitStatus::Failure);
        assert_eq!(result.exit_status().code(), 1);

        result.succeeded = 1;
        assert_eq!(result.exit_status(), ExitStatus::Partial);
        assert_eq!(result.exit_status().code(), 2);
    }

    #[test]
    fn fatal_result_has_one_error() {
        let result = RunResult::fatal(CommandKind::Retry, "lock held");
        assert_eq!(result.command, "retry");
        assert_eq!(result.failed, 1);
        assert_eq!(result.errors, vec!["lock held".to_string()]);
        assert_eq!(result.exit_status(), ExitStatus::Failure);
    }

    #[test]
    fn empty_fields_are_omitted_from_json() {
        let json = serde_json::to_value(RunResult::new(CommandKind::Status)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "command": "status",
                "processed": 0,
                "succeeded": 0,
                "failed": 0,
                "requeued": 0,
                "skipped": 0,
                "duration_ms": 0,
            })
        );

        let json = serde_json::to_value(
            RunResult::new(CommandKind::Cleanup).with_data("audio_removed", serde_json::json!(3)),
        )
        .unwrap();
        assert_eq!(json["data"]["audio_removed"], 3);
    }
}
