use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use voice_inbox_core::{ItemStatus, Step, StepFailure};
use voice_inbox_infra::{ItemOutputs, ItemRecord};

use super::process::{Outcome, WorkItem};
use super::{within, PipelineError, Runner};
use crate::result::{CommandKind, RunResult};

impl Runner {
    /// Re-drive due records: acknowledgment only for `reaction_pending`, a
    /// full Process for `failed` rows with budget left.
    #[instrument(skip(self), fields(command = "retry"))]
    pub async fn retry_due(&self, budget: Duration) -> Result<RunResult, PipelineError> {
        let started = std::time::Instant::now();
        let deadline = Instant::now() + budget;
        let (_lock, mut result) = self.begin(CommandKind::Retry).await?;

        match self
            .store
            .list_retry_candidates(self.now(), self.cfg.fetch_limit)
            .await
        {
            Ok(records) => {
                debug!(due = records.len(), "retry candidates loaded");
                for record in &records {
                    self.retry_record(&mut result, record, deadline).await;
                }
            }
            Err(e) => result.record_failure(format!("list retry candidates: {e}")),
        }

        Ok(self.finish(result, started).await)
    }

    async fn retry_record(&self, result: &mut RunResult, record: &ItemRecord, deadline: Instant) {
        let outcome = match record.status {
            ItemStatus::ReactionPending => {
                result.processed += 1;
                self.retry_acknowledgment(record, deadline).await
            }
            ItemStatus::Failed if self.cfg.retry.is_exhausted(record.attempts) => {
                debug!(message_id = %record.message_id, attempts = record.attempts, "retry budget spent");
                result.skipped += 1;
                return;
            }
            ItemStatus::Failed => {
                result.processed += 1;
                self.process(&WorkItem::from_record(record), record.attempts, deadline)
                    .await
            }
            ItemStatus::Pending | ItemStatus::Done => {
                warn!(
                    message_id = %record.message_id,
                    status = record.status.as_str(),
                    "record is not retriable"
                );
                result.skipped += 1;
                return;
            }
        };
        outcome.tally(result, &record.message_id);
    }

    async fn retry_acknowledgment(&self, record: &ItemRecord, deadline: Instant) -> Outcome {
        let outputs = ItemOutputs {
            journal_path: record.journal_path.clone(),
            audio_path: record.audio_path.clone(),
            transcript_path: record.transcript_path.clone(),
            jump_url: record.jump_url.clone(),
        };

        let acked = within(
            deadline,
            "acknowledge",
            self.services
                .source
                .acknowledge(&record.channel_id, &record.message_id),
        )
        .await;

        let now = self.now();
        let error = match acked {
            Ok(()) => {
                return match self.store.mark_done(&record.message_id, &outputs, now).await {
                    Ok(()) => Outcome::Done,
                    Err(e) => Outcome::Failed {
                        error: format!("mark done after acknowledgment: {e}"),
                        requeued: false,
                    },
                };
            }
            Err(e) => StepFailure::new(Step::Acknowledge, e).to_string(),
        };

        let attempts = record.attempts.saturating_add(1);
        let policy = &self.cfg.retry;
        warn!(message_id = %record.message_id, attempts, error = %error, "acknowledgment retry failed");

        let (stored, requeued) = if policy.is_exhausted(attempts) {
            let stored = self
                .store
                .mark_failed(&record.message_id, &error, attempts, None, now)
                .await;
            (stored, false)
        } else {
            let next = policy.next_retry_at(now, attempts);
            let stored = self
                .store
                .mark_reaction_pending(&record.message_id, &error, attempts, next, &outputs, now)
                .await;
            (stored, true)
        };

        match stored {
            Ok(()) => Outcome::Failed { error, requeued },
            Err(e) => Outcome::Failed {
                error: format!("{error}; and recording the failure: {e}"),
                requeued: false,
            },
        }
    }
}
