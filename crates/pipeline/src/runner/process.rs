//! Per-item processing and its failure transitions.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use voice_inbox_core::{InboxError, MessageId, Step, StepFailure};
use voice_inbox_infra::{ItemOutputs, ItemRecord};

use super::{within, Runner};
use crate::journal::{build_entry, contains_entry, journal_path, new_document, EntryInput};
use crate::result::RunResult;
use crate::selector::{Candidate, CandidateKind};

/// Everything Process needs, built from a fresh candidate or a stored record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub message_id: MessageId,
    pub channel_id: String,
    pub author_id: String,
    pub attachment_id: String,
    pub attachment_url: String,
    pub kind: CandidateKind,
    /// Message body; the transcript of a text item.
    pub text: String,
    pub jump_url: Option<String>,
}

impl WorkItem {
    pub fn from_candidate(candidate: &Candidate) -> Self {
        Self {
            message_id: candidate.message.id.clone(),
            channel_id: candidate.message.channel_id.clone(),
            author_id: candidate.message.author.id.clone(),
            attachment_id: candidate.attachment.id.clone(),
            attachment_url: candidate.attachment.url.clone(),
            kind: candidate.kind,
            text: candidate.message.content.clone(),
            jump_url: candidate.jump_url.clone(),
        }
    }

    pub fn from_record(record: &ItemRecord) -> Self {
        Self {
            message_id: record.message_id.clone(),
            channel_id: record.channel_id.clone(),
            author_id: record.author_id.clone(),
            attachment_id: record.attachment_id.clone(),
            attachment_url: record.attachment_url.clone(),
            kind: CandidateKind::of(&record.attachment_url),
            text: record.message_text.clone().unwrap_or_default(),
            jump_url: record.jump_url.clone(),
        }
    }
}

/// How one item ended within a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Outcome {
    Done,
    Failed { error: String, requeued: bool },
}

impl Outcome {
    pub(crate) fn tally(self, result: &mut RunResult, id: &MessageId) {
        match self {
            Outcome::Done => result.succeeded += 1,
            Outcome::Failed { error, requeued } => {
                result.record_failure(format!("message {id}: {error}"));
                if requeued {
                    result.requeued += 1;
                }
            }
        }
    }
}

/// Content produced before acknowledgment.
struct Produced {
    transcript: String,
    audio_path: Option<PathBuf>,
    transcript_path: Option<PathBuf>,
}

impl Runner {
    /// Download, normalize, transcribe, append to the journal, acknowledge.
    #[instrument(skip(self, item, deadline), fields(message_id = %item.message_id, kind = item.kind.as_str()))]
    pub(crate) async fn process(&self, item: &WorkItem, attempts: u32, deadline: Instant) -> Outcome {
        let now = self.now();

        let outputs = match self.produce(item, now, deadline).await {
            Ok(outputs) => outputs,
            Err(failure) => {
                return self
                    .route_failure(item, attempts, failure, &ItemOutputs::default())
                    .await;
            }
        };

        let acked = within(
            deadline,
            "acknowledge",
            self.services
                .source
                .acknowledge(&item.channel_id, &item.message_id),
        )
        .await;
        if let Err(e) = acked {
            let failure = StepFailure::new(Step::Acknowledge, e);
            return self.route_failure(item, attempts, failure, &outputs).await;
        }

        match self.store.mark_done(&item.message_id, &outputs, self.now()).await {
            Ok(()) => {
                info!(journal = outputs.journal_path.as_deref(), "item done");
                Outcome::Done
            }
            Err(e) => Outcome::Failed {
                error: format!("mark done: {e}"),
                requeued: false,
            },
        }
    }

    async fn produce(
        &self,
        item: &WorkItem,
        now: DateTime<Utc>,
        deadline: Instant,
    ) -> Result<ItemOutputs, StepFailure> {
        let local = now.with_timezone(&Local).fixed_offset();

        let produced = match item.kind {
            CandidateKind::Text => Produced {
                transcript: item.text.clone(),
                audio_path: None,
                transcript_path: None,
            },
            CandidateKind::Audio => self.transcribe_audio(item, now, deadline).await?,
        };

        let doc = |e: InboxError| StepFailure::new(Step::Document, e);
        let documents = &self.services.documents;
        let path = journal_path(&self.cfg.vault_journal_dir, local.date_naive());

        if !within(deadline, "journal exists", documents.file_exists(&path))
            .await
            .map_err(doc)?
        {
            within(
                deadline,
                "create journal",
                documents.create_file(&path, &new_document(local)),
            )
            .await
            .map_err(doc)?;
        }

        let existing = within(deadline, "read journal", documents.read_file(&path))
            .await
            .map_err(doc)?;
        if contains_entry(&existing, &item.message_id) {
            debug!(journal = %path, "entry already present, not appending");
        } else {
            let audio_file = produced
                .audio_path
                .as_deref()
                .map(|p| self.store_relative(p))
                .unwrap_or_default();
            let whisper_model = match item.kind {
                CandidateKind::Audio => self.cfg.whisper_model.as_str(),
                CandidateKind::Text => "",
            };
            let entry = build_entry(&EntryInput {
                now: local,
                transcript: &produced.transcript,
                channel_id: &item.channel_id,
                message_id: &item.message_id,
                author_id: &item.author_id,
                jump_url: item.jump_url.as_deref().unwrap_or_default(),
                audio_file: &audio_file,
                whisper_model,
                processed_at: self.now().with_timezone(&Local).fixed_offset(),
            });
            within(deadline, "append journal", documents.append_file(&path, &entry))
                .await
                .map_err(doc)?;
        }

        Ok(ItemOutputs {
            journal_path: Some(path),
            audio_path: produced.audio_path.map(display),
            transcript_path: produced.transcript_path.map(display),
            jump_url: item.jump_url.clone(),
        })
    }

    async fn transcribe_audio(
        &self,
        item: &WorkItem,
        now: DateTime<Utc>,
        deadline: Instant,
    ) -> Result<Produced, StepFailure> {
        let day_dir = self
            .cfg
            .audio_store_dir
            .join(now.with_timezone(&Local).format("%Y/%m/%d").to_string());
        let prefix = format!("{}_{}", item.message_id, item.attachment_id);
        let original = day_dir.join(format!("{prefix}.orig"));
        let wav = day_dir.join(format!("{prefix}.wav"));

        within(
            deadline,
            "download attachment",
            self.services
                .source
                .download_attachment(&item.attachment_url, &original),
        )
        .await
        .map_err(|e| StepFailure::new(Step::Download, e))?;

        within(
            deadline,
            "normalize audio",
            self.services.normalizer.normalize(&original, &wav),
        )
        .await
        .map_err(|e| StepFailure::new(Step::Normalize, e))?;

        let transcript = within(
            deadline,
            "transcribe",
            self.services
                .transcriber
                .transcribe(&wav, &day_dir.join("transcripts")),
        )
        .await
        .map_err(|e| StepFailure::new(Step::Transcribe, e))?;

        Ok(Produced {
            transcript: transcript.text,
            audio_path: Some(original),
            transcript_path: transcript.artifact_path,
        })
    }

    /// Persist a failure: acknowledgment failures keep the produced paths and
    /// wait in `reaction_pending`; anything earlier lands in `failed`, without
    /// a retry time once the budget is spent.
    async fn route_failure(
        &self,
        item: &WorkItem,
        attempts: u32,
        failure: StepFailure,
        outputs: &ItemOutputs,
    ) -> Outcome {
        let attempts = attempts.saturating_add(1);
        let now = self.now();
        let error = failure.to_string();
        let policy = &self.cfg.retry;

        warn!(
            message_id = %item.message_id,
            step = %failure.step,
            attempts,
            error = %error,
            "item failed"
        );

        let (stored, requeued) = if failure.is_acknowledgment() {
            let next = policy.next_retry_at(now, attempts);
            let stored = self
                .store
                .mark_reaction_pending(&item.message_id, &error, attempts, next, outputs, now)
                .await;
            (stored, true)
        } else {
            let next = (!policy.is_exhausted(attempts)).then(|| policy.next_retry_at(now, attempts));
            let stored = self
                .store
                .mark_failed(&item.message_id, &error, attempts, next, now)
                .await;
            (stored, next.is_some())
        };

        match stored {
            Ok(()) => Outcome::Failed { error, requeued },
            Err(e) => Outcome::Failed {
                error: format!("{error}; and recording the failure: {e}"),
                requeued: false,
            },
        }
    }

    /// Path relative to the audio store with `/` separators, or the path itself
    /// when it lies elsewhere.
    fn store_relative(&self, path: &Path) -> String {
        match path.strip_prefix(&self.cfg.audio_store_dir) {
            Ok(rel) => rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/"),
            Err(_) => path.display().to_string(),
        }
    }
}

fn display(path: PathBuf) -> String {
    path.to_string_lossy().into_owned()
}
