use std::time::Duration;

use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::time::Instant;
use tracing::{instrument, warn};

use voice_inbox_core::{InboxError, InboxResult};

use super::{elapsed_ms, within, Runner};
use crate::result::{CommandKind, RunResult};

/// Runs listed by `status`.
pub const RECENT_RUNS: u32 = 5;

/// One line of the health report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub name: &'static str,
    pub pass: bool,
    pub detail: String,
}

impl Runner {
    /// Probe binaries, the state store and both remote APIs.
    ///
    /// Takes no lock and opens no run record.
    #[instrument(skip(self), fields(command = "doctor"))]
    pub async fn doctor(&self, budget: Duration) -> RunResult {
        let started = std::time::Instant::now();
        let deadline = Instant::now() + budget;
        let services = &self.services;

        let probes: [(&'static str, InboxResult<String>); 5] = [
            (
                "ffmpeg_bin",
                within(deadline, "ffmpeg check", services.normalizer.check())
                    .await
                    .map(|()| "found".to_string()),
            ),
            (
                "whisper_bin",
                within(deadline, "whisper check", services.transcriber.check())
                    .await
                    .map(|()| "found".to_string()),
            ),
            (
                "db_writable",
                self.store
                    .record_health_check(self.now())
                    .await
                    .map(|()| "ok".to_string())
                    .map_err(InboxError::from),
            ),
            (
                "discord_api",
                within(deadline, "discord whoami", services.source.whoami())
                    .await
                    .map(|name| format!("authenticated as {name}")),
            ),
            (
                "obsidian_api",
                within(deadline, "obsidian health", services.documents.health())
                    .await
                    .map(|()| "authenticated".to_string()),
            ),
        ];

        let mut result = RunResult::new(CommandKind::Doctor);
        let mut checks = Vec::with_capacity(probes.len());
        for (name, probe) in probes {
            let check = match probe {
                Ok(detail) => HealthCheck {
                    name,
                    pass: true,
                    detail,
                },
                Err(e) => {
                    warn!(check = name, error = %e, "health check failed");
                    result.record_failure(format!("{name}: {e}"));
                    HealthCheck {
                        name,
                        pass: false,
                        detail: e.to_string(),
                    }
                }
            };
            checks.push(check);
        }

        match to_json("checks", &checks) {
            Ok(checks) => result = result.with_data("checks", checks),
            Err(e) => result.errors.push(e.to_string()),
        }
        result.duration_ms = elapsed_ms(started);
        result
    }

    /// Read-only summary of the store and the most recent runs.
    #[instrument(skip(self), fields(command = "status"))]
    pub async fn status(&self, budget: Duration) -> RunResult {
        let started = std::time::Instant::now();
        let deadline = Instant::now() + budget;
        let mut result = RunResult::new(CommandKind::Status);

        let summary = within(deadline, "status summary", async {
            self.store
                .summary(self.now(), self.cfg.retry.max_attempts)
                .await
                .map_err(InboxError::from)
        })
        .await;
        match summary.and_then(|s| to_json("summary", &s)) {
            Ok(summary) => result = result.with_data("summary", summary),
            Err(e) => result.record_failure(format!("summary: {e}")),
        }

        let runs = within(deadline, "recent runs", async {
            self.store
                .recent_runs(RECENT_RUNS)
                .await
                .map_err(InboxError::from)
        })
        .await;
        match runs.and_then(|r| to_json("recent runs", &r)) {
            Ok(runs) => result = result.with_data("recent_runs", runs),
            Err(e) => result.record_failure(format!("recent runs: {e}")),
        }

        result.duration_ms = elapsed_ms(started);
        result
    }
}

fn to_json<T: Serialize>(what: &str, value: &T) -> InboxResult<JsonValue> {
    serde_json::to_value(value).map_err(|e| InboxError::processing(format!("encode {what}: {e}")))
}
