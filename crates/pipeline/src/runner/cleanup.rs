use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tokio::time::Instant;
use tracing::{debug, instrument};

use voice_inbox_core::{InboxError, InboxResult};
use voice_inbox_infra::ItemRecord;

use super::{PipelineError, Runner};
use crate::result::{CommandKind, RunResult};

/// Rows handled per sweep and run.
pub const CLEANUP_BATCH: u32 = 1000;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Artifact {
    Audio,
    Transcript,
}

impl Artifact {
    fn as_str(&self) -> &'static str {
        match self {
            Artifact::Audio => "audio",
            Artifact::Transcript => "transcript",
        }
    }

    fn path_of(self, record: &ItemRecord) -> Option<&str> {
        let path = match self {
            Artifact::Audio => record.audio_path.as_deref(),
            Artifact::Transcript => record.transcript_path.as_deref(),
        };
        path.filter(|p| !p.trim().is_empty())
    }
}

impl Runner {
    /// Remove expired audio and transcript artifacts of done items.
    #[instrument(skip(self), fields(command = "cleanup"))]
    pub async fn cleanup(&self, budget: Duration) -> Result<RunResult, PipelineError> {
        let started = std::time::Instant::now();
        let deadline = Instant::now() + budget;
        let (_lock, mut result) = self.begin(CommandKind::Cleanup).await?;

        let now = self.now();
        let audio_removed = self
            .sweep(
                &mut result,
                Artifact::Audio,
                cutoff(now, self.cfg.audio_retention_days),
                deadline,
            )
            .await;
        let transcript_removed = self
            .sweep(
                &mut result,
                Artifact::Transcript,
                cutoff(now, self.cfg.transcript_retention_days),
                deadline,
            )
            .await;

        let result = result
            .with_data("audio_removed", JsonValue::from(audio_removed))
            .with_data("transcript_removed", JsonValue::from(transcript_removed));
        Ok(self.finish(result, started).await)
    }

    async fn sweep(
        &self,
        result: &mut RunResult,
        artifact: Artifact,
        cutoff: DateTime<Utc>,
        deadline: Instant,
    ) -> u32 {
        let listed = match artifact {
            Artifact::Audio => {
                self.store
                    .list_done_with_audio_before(cutoff, CLEANUP_BATCH)
                    .await
            }
            Artifact::Transcript => {
                self.store
                    .list_done_with_transcript_before(cutoff, CLEANUP_BATCH)
                    .await
            }
        };
        let records = match listed {
            Ok(records) => records,
            Err(e) => {
                result.record_failure(format!("list {} cleanup rows: {e}", artifact.as_str()));
                return 0;
            }
        };

        let mut removed = 0;
        for record in &records {
            let Some(path) = artifact.path_of(record) else {
                continue;
            };
            if Instant::now() >= deadline {
                result.record_failure(format!(
                    "{} cleanup: command deadline exceeded",
                    artifact.as_str()
                ));
                break;
            }

            result.processed += 1;
            if let Err(e) = self.remove_artifact(artifact, path).await {
                result.record_failure(format!("remove {} {path}: {e}", artifact.as_str()));
                continue;
            }

            let cleared = match artifact {
                Artifact::Audio => self.store.clear_audio_path(&record.message_id, self.now()).await,
                Artifact::Transcript => {
                    self.store
                        .clear_transcript_path(&record.message_id, self.now())
                        .await
                }
            };
            match cleared {
                Ok(()) => {
                    debug!(message_id = %record.message_id, path, artifact = artifact.as_str(), "artifact removed");
                    removed += 1;
                    result.succeeded += 1;
                }
                Err(e) => result.record_failure(format!(
                    "clear {} path for {}: {e}",
                    artifact.as_str(),
                    record.message_id
                )),
            }
        }
        removed
    }

    async fn remove_artifact(&self, artifact: Artifact, path: &str) -> InboxResult<()> {
        let target = contained_path(&self.cfg.audio_store_dir, Path::new(path))?;
        remove_if_present(&target).await?;
        if artifact == Artifact::Audio {
            remove_if_present(&target.with_extension("wav")).await?;
        }
        Ok(())
    }
}

fn cutoff(now: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    now.checked_sub_signed(chrono::Duration::days(i64::from(days)))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

async fn remove_if_present(path: &Path) -> InboxResult<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(InboxError::processing(format!("{}: {e}", path.display()))),
    }
}

/// Resolve `target` to an absolute, lexically normalized path strictly inside
/// `root`.
pub(crate) fn contained_path(root: &Path, target: &Path) -> InboxResult<PathBuf> {
    let absolute = |p: &Path| {
        std::path::absolute(p)
            .map(|p| normalize_lexically(&p))
            .map_err(|e| InboxError::processing(format!("{}: {e}", p.display())))
    };
    let root = absolute(root)?;
    let target = absolute(target)?;
    if target != root && target.starts_with(&root) {
        Ok(target)
    } else {
        Err(InboxError::processing(format!(
            "path {} is outside root {}",
            target.display(),
            root.display()
        )))
    }
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_inside_root_are_accepted() {
        let root = Path::new("/data/audio");
        assert_eq!(
            contained_path(root, Path::new("/data/audio/2026/10/19/1_a.orig")).unwrap(),
            PathBuf::from("/data/audio/2026/10/19/1_a.orig")
        );
        assert_eq!(
            contained_path(root, Path::new("/data/audio/2026/./x/../1_a.orig")).unwrap(),
            PathBuf::from("/data/audio/2026/1_a.orig")
        );
    }

    #[test]
    fn escaping_paths_are_rejected() {
        let root = Path::new("/data/audio");
        for escaping in [
            "/data/audio/../secrets.txt",
            "/data/audio-other/1.orig",
            "/etc/passwd",
            "/data/audio",
            "/data/audio/2026/../../x",
        ] {
            let err = contained_path(root, Path::new(escaping)).unwrap_err();
            assert!(err.to_string().contains("outside root"), "{escaping}: {err}");
        }
    }

    #[test]
    fn cutoff_subtracts_days() {
        let now = DateTime::parse_from_rfc3339("2026-10-19T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            cutoff(now, 14),
            DateTime::parse_from_rfc3339("2026-10-05T08:00:00Z")
                .unwrap()
                .with_timezone(&Utc)
        );
    }
}
