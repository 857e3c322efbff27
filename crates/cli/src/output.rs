//! Rendering of command results: the result on stdout, errors on stderr.

use std::io::Write;

use anyhow::{Context, Result};

use voice_inbox_pipeline::RunResult;

use crate::redact::Redactor;

/// Result with every error string and data string scrubbed.
pub fn redacted(result: &RunResult, redactor: &Redactor) -> RunResult {
    let mut clean = result.clone();
    for error in &mut clean.errors {
        *error = redactor.redact(error);
    }
    for value in clean.data.values_mut() {
        redactor.redact_json(value);
    }
    clean
}

/// One-line summary plus the auxiliary data as compact JSON.
pub fn human(result: &RunResult) -> Result<String> {
    let mut out = format!(
        "command={} run_id={} processed={} succeeded={} failed={} requeued={} skipped={} duration_ms={}\n",
        result.command,
        result.run_id.as_deref().unwrap_or_default(),
        result.processed,
        result.succeeded,
        result.failed,
        result.requeued,
        result.skipped,
        result.duration_ms,
    );
    if !result.data.is_empty() {
        let data = serde_json::to_string(&result.data).context("encode result data")?;
        out.push_str(&format!("data={data}\n"));
    }
    Ok(out)
}

pub fn json(result: &RunResult) -> Result<String> {
    let mut out = serde_json::to_string_pretty(result).context("encode result")?;
    out.push('\n');
    Ok(out)
}

/// Write the result to stdout and the itemized errors to stderr.
pub fn print(result: &RunResult, as_json: bool, redactor: &Redactor) -> Result<()> {
    let clean = redacted(result, redactor);
    let rendered = if as_json { json(&clean)? } else { human(&clean)? };

    let mut stdout = std::io::stdout().lock();
    stdout
        .write_all(rendered.as_bytes())
        .context("write result to stdout")?;
    stdout.flush().context("flush stdout")?;

    if !clean.errors.is_empty() {
        let mut stderr = std::io::stderr().lock();
        writeln!(stderr, "errors:").context("write errors")?;
        for error in &clean.errors {
            writeln!(stderr, "- {error}").context("write errors")?;
        }
    }
    Ok(())
}
