//! Daily journal documents: paths, front matter and entry rendering.

use chrono::{DateTime, FixedOffset, NaiveDate, SecondsFormat};

use voice_inbox_core::MessageId;

const EMPTY_TRANSCRIPT: &str = "(transcript is empty)";

/// Vault path of the journal document for `date`: `<dir>/YYYY-MM-DD.md`.
pub fn journal_path(journal_dir: &str, date: NaiveDate) -> String {
    let file = format!("{}.md", date.format("%Y-%m-%d"));
    let dir = journal_dir.trim_matches('/');
    if dir.is_empty() {
        file
    } else {
        format!("{dir}/{file}")
    }
}

/// Initial content of a freshly created daily document.
pub fn new_document(now: DateTime<FixedOffset>) -> String {
    let title = now.format("%Y_%m_%d");
    format!(
        "---\ntitle: \"{title}\"\ntype: journal\ndate: {date}\ncreated: {created}\ntags: [journal]\nsource: voice-inbox\n---\n# {title}\n",
        date = now.format("%Y-%m-%d"),
        created = now.to_rfc3339_opts(SecondsFormat::Secs, true),
    )
}

/// Everything rendered into one journal entry.
#[derive(Debug, Clone)]
pub struct EntryInput<'a> {
    pub now: DateTime<FixedOffset>,
    pub transcript: &'a str,
    pub channel_id: &'a str,
    pub message_id: &'a MessageId,
    pub author_id: &'a str,
    pub jump_url: &'a str,
    /// Audio path relative to the audio store; empty for text items.
    pub audio_file: &'a str,
    /// Empty for text items.
    pub whisper_model: &'a str,
    pub processed_at: DateTime<FixedOffset>,
}

/// Render an entry. The embedded YAML block carries the [`marker`] used by the
/// duplicate-append guard.
pub fn build_entry(input: &EntryInput<'_>) -> String {
    let transcript = match input.transcript.trim() {
        "" => EMPTY_TRANSCRIPT,
        text => text,
    };
    format!(
        "\n## ログ - {time}\n### 🎤 Voice Inbox\n\n{transcript}\n\n```yaml\nvoice_inbox:\n  discord_channel_id: \"{channel}\"\n  {marker}\n  discord_author_id: \"{author}\"\n  discord_jump_url: \"{jump}\"\n  audio_file: \"{audio}\"\n  whisper_model: \"{model}\"\n  processed_at: \"{processed}\"\n```\n",
        time = input.now.format("%H:%M"),
        channel = input.channel_id,
        marker = marker(input.message_id),
        author = input.author_id,
        jump = input.jump_url,
        audio = input.audio_file,
        model = input.whisper_model,
        processed = input.processed_at.to_rfc3339_opts(SecondsFormat::Secs, true),
    )
}

/// Line embedded in every entry identifying its source message.
pub fn marker(message_id: &MessageId) -> String {
    format!("discord_message_id: \"{message_id}\"")
}

pub fn contains_entry(document: &str, message_id: &MessageId) -> bool {
    document.contains(&marker(message_id))
}
