//! Raw message shapes as delivered by the message source.

use serde::{Deserialize, Deserializer, Serialize};

use crate::id::MessageId;

/// Author of a source message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub username: String,
}

/// File attached to a source message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub url: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub filename: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub content_type: String,
}

impl Attachment {
    pub fn is_audio(&self) -> bool {
        self.content_type
            .trim()
            .to_ascii_lowercase()
            .starts_with("audio/")
    }
}

/// A message fetched from the inbox channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub channel_id: String,
    /// Parent group (guild) id; Discord omits it on some payloads.
    #[serde(default)]
    pub guild_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub content: String,
    pub author: Author,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl Message {
    /// Non-blank guild id, if any.
    pub fn guild(&self) -> Option<&str> {
        self.guild_id
            .as_deref()
            .map(str::trim)
            .filter(|g| !g.is_empty())
    }
}

/// A channel as returned by the message source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    #[serde(default)]
    pub guild_id: Option<String>,
}

/// Discord sends `null` for some optional string fields.
fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}
