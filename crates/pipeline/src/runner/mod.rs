//! Command runner: poll, retry, cleanup, doctor and status over the state
//! store and the collaborator ports.
//!
//! Every command takes a time budget. External calls are bounded by the
//! resulting deadline; an expired deadline fails the in-flight item through the
//! normal failure transition.

mod cleanup;
mod doctor;
mod process;
mod retry;


use std::collections::HashSet;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use voice_inbox_core::{
    AudioNormalizer, DocumentStore, InboxError, InboxResult, MessageSource, MessageId,
    RetryPolicy, Transcriber,
};
use voice_inbox_infra::state::RunCounts;
use voice_inbox_infra::{Config, LockError, NewItem, RunLock, StateStore, StoreError};

use crate::result::{CommandKind, RunResult};
use crate::selector::{
    apply_fallback_guild, first_guild, max_message_id, select_candidates, Candidate,
};

pub use process::WorkItem;

/// Wall clock used for every persisted timestamp.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Runner settings derived from [`Config`].
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub channel_id: String,
    pub allowed_author_ids: HashSet<String>,
    pub fetch_limit: u32,
    pub whisper_model: String,
    pub vault_journal_dir: String,
    pub audio_store_dir: PathBuf,
    pub lock_path: PathBuf,
    pub audio_retention_days: u32,
    pub transcript_retention_days: u32,
    pub retry: RetryPolicy,
}

impl RunnerConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            channel_id: cfg.channel_id.clone(),
            allowed_author_ids: cfg.allowed_author_ids.iter().cloned().collect(),
            fetch_limit: cfg.fetch_limit,
            whisper_model: cfg.whisper_model.clone(),
            vault_journal_dir: cfg.vault_journal_dir.clone(),
            audio_store_dir: cfg.audio_store_dir.clone(),
            lock_path: cfg.lock_path.clone(),
            audio_retention_days: cfg.audio_retention_days,
            transcript_retention_days: cfg.transcript_retention_days,
            retry: cfg.retry_policy(),
        }
    }
}

/// External services the runner drives.
#[derive(Clone)]
pub struct Collaborators {
    pub source: Arc<dyn MessageSource>,
    pub documents: Arc<dyn DocumentStore>,
    pub normalizer: Arc<dyn AudioNormalizer>,
    pub transcriber: Arc<dyn Transcriber>,
}

/// Errors that abort a command before any item is touched.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<PipelineError> for InboxError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Lock(e) => e.into(),
            PipelineError::Store(e) => e.into(),
        }
    }
}

pub struct Runner {
    cfg: RunnerConfig,
    store: StateStore,
    services: Collaborators,
    clock: Clock,
}

impl Runner {
    pub fn new(cfg: RunnerConfig, store: StateStore, services: Collaborators) -> Self {
        Self {
            cfg,
            store,
            services,
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Fetch new messages, process every candidate and advance the cursor.
    #[instrument(skip(self), fields(command = "poll"))]
    pub async fn poll_once(&self, budget: Duration) -> Result<RunResult, PipelineError> {
        let started = std::time::Instant::now();
        let deadline = Instant::now() + budget;
        let (_lock, mut result) = self.begin(CommandKind::Poll).await?;

        self.poll_cycle(&mut result, deadline).await;

        Ok(self.finish(result, started).await)
    }

    async fn poll_cycle(&self, result: &mut RunResult, deadline: Instant) {
        let cursor = match self.store.last_seen_message_id().await {
            Ok(cursor) => cursor,
            Err(e) => {
                result.record_failure(format!("read cursor: {e}"));
                return;
            }
        };

        let fetched = within(
            deadline,
            "fetch messages",
            self.services.source.fetch_messages(
                &self.cfg.channel_id,
                cursor.as_ref(),
                self.cfg.fetch_limit,
            ),
        )
        .await;
        let messages = match fetched {
            Ok(messages) => messages,
            Err(e) => {
                result.record_failure(format!("fetch messages: {e}"));
                return;
            }
        };

        let mut candidates = select_candidates(&messages, &self.cfg.allowed_author_ids);
        info!(
            fetched = messages.len(),
            candidates = candidates.len(),
            after = cursor.as_ref().map(MessageId::as_str),
            "fetched inbox messages"
        );

        if candidates.iter().any(|c| c.jump_url.is_none()) {
            let guild = match first_guild(&messages) {
                Some(guild) => Some(guild),
                None => self.channel_guild(deadline).await,
            };
            if let Some(guild) = guild {
                apply_fallback_guild(&mut candidates, &guild);
            }
        }

        for candidate in &candidates {
            self.poll_candidate(result, candidate, deadline).await;
        }

        if let Some(max_id) = max_message_id(&messages) {
            if let Err(e) = self.store.advance_cursor(&max_id, self.now()).await {
                result.record_failure(format!("advance cursor to {max_id}: {e}"));
            }
        }
    }

    async fn poll_candidate(&self, result: &mut RunResult, candidate: &Candidate, deadline: Instant) {
        let id = &candidate.message.id;
        let existing = match self.store.get_item(id).await {
            Ok(existing) => existing,
            Err(e) => {
                result.processed += 1;
                result.record_failure(format!("message {id} lookup: {e}"));
                return;
            }
        };
        if existing.as_ref().is_some_and(|r| r.status.is_done()) {
            result.skipped += 1;
            return;
        }

        if let Err(e) = self.store.upsert_pending(&new_item(candidate), self.now()).await {
            result.processed += 1;
            result.record_failure(format!("message {id} upsert: {e}"));
            return;
        }

        let attempts = existing.map(|r| r.attempts).unwrap_or(0);
        result.processed += 1;
        let outcome = self
            .process(&WorkItem::from_candidate(candidate), attempts, deadline)
            .await;
        outcome.tally(result, id);
    }

    async fn channel_guild(&self, deadline: Instant) -> Option<String> {
        let channel_id = &self.cfg.channel_id;
        match within(
            deadline,
            "get channel",
            self.services.source.get_channel(channel_id),
        )
        .await
        {
            Ok(channel) => channel.guild_id.filter(|g| !g.trim().is_empty()),
            Err(e) => {
                warn!(channel_id = %channel_id, error = %e, "could not resolve guild for jump links");
                None
            }
        }
    }

    /// Take the run lock and open a run record.
    async fn begin(&self, command: CommandKind) -> Result<(RunLock, RunResult), PipelineError> {
        let lock = RunLock::acquire(&self.cfg.lock_path)?;
        let run_id = self.store.begin_run(command.as_str(), self.now()).await?;
        let mut result = RunResult::new(command);
        result.run_id = Some(run_id);
        Ok((lock, result))
    }

    /// Finalize the run record with the final counters.
    async fn finish(&self, mut result: RunResult, started: std::time::Instant) -> RunResult {
        if let Some(run_id) = result.run_id.clone() {
            let counts = RunCounts {
                processed: result.processed,
                succeeded: result.succeeded,
                failed: result.failed,
            };
            if let Err(e) = self.store.finish_run(&run_id, self.now(), counts).await {
                result.record_failure(format!("finalize run {run_id}: {e}"));
            }
        }
        result.duration_ms = elapsed_ms(started);

        info!(
            command = %result.command,
            run_id = result.run_id.as_deref(),
            processed = result.processed,
            succeeded = result.succeeded,
            failed = result.failed,
            requeued = result.requeued,
            skipped = result.skipped,
            duration_ms = result.duration_ms,
            "run finished"
        );
        result
    }
}

/// Await `fut` no later than `deadline`.
pub(crate) async fn within<T, F>(deadline: Instant, what: &str, fut: F) -> InboxResult<T>
where
    F: Future<Output = InboxResult<T>>,
{
    match tokio::time::timeout_at(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(InboxError::timeout(format!("{what}: command deadline exceeded"))),
    }
}

pub(crate) fn elapsed_ms(started: std::time::Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn new_item(candidate: &Candidate) -> NewItem {
    let message = &candidate.message;
    NewItem {
        message_id: message.id.clone(),
        channel_id: message.channel_id.clone(),
        author_id: message.author.id.clone(),
        attachment_id: candidate.attachment.id.clone(),
        attachment_url: candidate.attachment.url.clone(),
        attachment_filename: candidate.attachment.filename.clone(),
        content_type: candidate.attachment.content_type.clone(),
        message_text: Some(message.content.trim().to_string()).filter(|t| !t.is_empty()),
        jump_url: candidate.jump_url.clone(),
    }
}
