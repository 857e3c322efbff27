//! Subprocess adapters: `ffmpeg` normalization and `whisper` transcription.
//!
//! Children are spawned with `kill_on_drop`, so a caller that drops the future
//! on deadline expiry also terminates the process.

use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, instrument};

use voice_inbox_core::{AudioNormalizer, InboxError, InboxResult, Transcriber, Transcript};

/// Locate an executable: explicit paths must be regular files, bare names are
/// looked up on `PATH`.
pub fn resolve_binary(bin: &str) -> InboxResult<PathBuf> {
    let candidate = Path::new(bin);
    if candidate.components().count() > 1 || candidate.is_absolute() {
        return match std::fs::metadata(candidate) {
            Ok(meta) if meta.is_file() => Ok(candidate.to_path_buf()),
            Ok(_) => Err(InboxError::processing(format!("{bin} is not a file"))),
            Err(e) => Err(InboxError::processing(format!("{bin}: {e}"))),
        };
    }
    which::which(bin).map_err(|e| InboxError::processing(format!("{bin}: {e}")))
}

async fn run(what: &str, mut cmd: Command) -> InboxResult<Output> {
    cmd.kill_on_drop(true).stdin(std::process::Stdio::null());
    let output = cmd
        .output()
        .await
        .map_err(|e| InboxError::processing(format!("{what} could not start: {e}")))?;
    if !output.status.success() {
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        return Err(InboxError::processing(format!(
            "{what} failed: {}: {}",
            output.status,
            combined.trim()
        )));
    }
    Ok(output)
}

async fn ensure_dir(dir: &Path) -> InboxResult<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| InboxError::processing(format!("{}: {e}", dir.display())))
}

/// Converts any input to mono 16 kHz 16-bit PCM WAV.
#[derive(Debug, Clone)]
pub struct FfmpegNormalizer {
    bin: String,
}

impl FfmpegNormalizer {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }
}

#[async_trait]
impl AudioNormalizer for FfmpegNormalizer {
    #[instrument(skip(self), fields(input = %input.display()), err)]
    async fn normalize(&self, input: &Path, output: &Path) -> InboxResult<()> {
        if let Some(parent) = output.parent() {
            ensure_dir(parent).await?;
        }
        let mut cmd = Command::new(&self.bin);
        cmd.arg("-y")
            .arg("-i")
            .arg(input)
            .args(["-ac", "1", "-ar", "16000", "-c:a", "pcm_s16le"])
            .arg(output);
        run("ffmpeg", cmd).await?;
        Ok(())
    }

    async fn check(&self) -> InboxResult<()> {
        resolve_binary(&self.bin).map(|_| ())
    }
}

/// Runs the `whisper` CLI and reads back its JSON artifact.
#[derive(Debug, Clone)]
pub struct WhisperTranscriber {
    bin: String,
    model: String,
    language: String,
    timeout: Duration,
}

impl WhisperTranscriber {
    pub fn new(
        bin: impl Into<String>,
        model: impl Into<String>,
        language: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            bin: bin.into(),
            model: model.into(),
            language: language.into(),
            timeout,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    #[instrument(skip(self), fields(wav = %wav.display(), model = %self.model), err)]
    async fn transcribe(&self, wav: &Path, out_dir: &Path) -> InboxResult<Transcript> {
        ensure_dir(out_dir).await?;

        let mut cmd = Command::new(&self.bin);
        cmd.arg(wav)
            .args(["--model", self.model.as_str()])
            .args(["--language", self.language.as_str()])
            .args(["--output_format", "json"])
            .arg("--output_dir")
            .arg(out_dir)
            .args(["--verbose", "False"]);

        tokio::time::timeout(self.timeout, run("whisper", cmd))
            .await
            .map_err(|_| {
                InboxError::timeout(format!("whisper exceeded {}s", self.timeout.as_secs_f64()))
            })??;

        let stem = wav
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let artifact = out_dir.join(format!("{stem}.json"));
        let raw = tokio::fs::read(&artifact).await.map_err(|e| {
            InboxError::processing(format!("read whisper json {}: {e}", artifact.display()))
        })?;
        let text = extract_text(&raw)?;
        debug!(chars = text.chars().count(), "transcription finished");

        Ok(Transcript {
            text,
            artifact_path: Some(artifact),
        })
    }

    async fn check(&self) -> InboxResult<()> {
        resolve_binary(&self.bin).map(|_| ())
    }
}

#[derive(Debug, Deserialize)]
struct WhisperJson {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    segments: Vec<Segment>,
}

#[derive(Debug, Deserialize)]
struct Segment {
    #[serde(default)]
    text: Option<String>,
}

/// Top-level `text` when non-blank, otherwise non-blank segments joined by newlines.
pub fn extract_text(raw: &[u8]) -> InboxResult<String> {
    let payload: WhisperJson = serde_json::from_slice(raw)
        .map_err(|e| InboxError::processing(format!("parse whisper json: {e}")))?;

    if let Some(text) = payload.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        return Ok(text.to_string());
    }

    let joined = payload
        .segments
        .iter()
        .filter_map(|s| s.text.as_deref().map(str::trim))
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    if joined.is_empty() {
        return Err(InboxError::processing("whisper json has no text segments"));
    }
    Ok(joined)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_level_text_wins() {
        let raw = br#"{"text": "  hello there ", "segments": [{"text": "ignored"}]}"#;
        assert_eq!(extract_text(raw).unwrap(), "hello there");
    }

    #[test]
    fn segments_are_joined_when_text_is_blank() {
        let raw = br#"{"text": "  ", "segments": [{"text": " one "}, {"text": ""}, {"text": "two"}]}"#;
        assert_eq!(extract_text(raw).unwrap(), "one\ntwo");
    }

    #[test]
    fn empty_or_invalid_payload_is_an_error() {
        assert!(extract_text(br#"{"text": "", "segments": []}"#).is_err());
        assert!(extract_text(b"not json").is_err());
    }

    #[test]
    fn directories_are_not_binaries() {
        let dir = tempfile::tempdir().unwrap();
        let as_str = dir.path().to_string_lossy().into_owned();
        assert!(resolve_binary(&as_str).is_err());
        assert!(resolve_binary("/definitely/not/here/ffmpeg").is_err());
    }

    #[cfg(unix)]
    fn script(dir: &Path, name: &str, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn normalizer_failure_includes_tool_output() {
        let dir = tempfile::tempdir().unwrap();
        let bin = script(dir.path(), "ffmpeg", "echo 'Invalid data found' >&2\nexit 1");

        let normalizer = FfmpegNormalizer::new(bin);
        normalizer.check().await.unwrap();
        let err = normalizer
            .normalize(&dir.path().join("in.orig"), &dir.path().join("out/in.wav"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Invalid data found"));
        assert!(dir.path().join("out").is_dir());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn whisper_artifact_is_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let bin = script(
            dir.path(),
            "whisper",
            r#"wav="$1"; shift
while [ $# -gt 0 ]; do
  if [ "$1" = "--output_dir" ]; then out="$2"; fi
  shift
done
name=$(basename "$wav" .wav)
printf '{"text": " hello world "}' > "$out/$name.json""#,
        );

        let transcriber = WhisperTranscriber::new(bin, "tiny", "en", Duration::from_secs(10));
        let out_dir = dir.path().join("transcripts");
        let transcript = transcriber
            .transcribe(&dir.path().join("100_a1.wav"), &out_dir)
            .await
            .unwrap();

        assert_eq!(transcript.text, "hello world");
        assert_eq!(transcript.artifact_path, Some(out_dir.join("100_a1.json")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn whisper_timeout_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let bin = script(dir.path(), "whisper", "sleep 5");

        let transcriber = WhisperTranscriber::new(bin, "tiny", "en", Duration::from_millis(100));
        let err = transcriber
            .transcribe(&dir.path().join("x.wav"), dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, InboxError::Timeout(_)));
    }
}
