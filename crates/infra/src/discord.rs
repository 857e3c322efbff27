//! Discord REST v10 client (message source).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

use voice_inbox_core::{Channel, InboxError, InboxResult, Message, MessageId, MessageSource};

use crate::http::{status_error, transport_error, REQUEST_TIMEOUT};

pub const DEFAULT_BASE_URL: &str = "https://discord.com/api/v10";

/// Percent-encoded ✅, the completion reaction.
const DONE_REACTION: &str = "%E2%9C%85";

const MAX_FETCH_LIMIT: u32 = 100;

#[derive(Debug, Deserialize)]
struct User {
    id: String,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Clone)]
pub struct DiscordClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl std::fmt::Debug for DiscordClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl DiscordClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> InboxResult<Self> {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| InboxError::config(format!("discord http client: {e}")))?;
        Ok(Self {
            http,
            base_url,
            token: token.into(),
        })
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        self.http
            .get(url)
            .header(reqwest::header::AUTHORIZATION, format!("Bot {}", self.token))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        what: &str,
        req: reqwest::RequestBuilder,
    ) -> InboxResult<T> {
        let resp = req.send().await.map_err(|e| transport_error(what, e))?;
        if resp.status() != StatusCode::OK {
            return Err(status_error(what, resp).await);
        }
        resp.json::<T>()
            .await
            .map_err(|e| InboxError::network(format!("{what}: invalid response body: {e}")))
    }
}

#[async_trait]
impl MessageSource for DiscordClient {
    #[instrument(skip(self), err)]
    async fn fetch_messages(
        &self,
        channel_id: &str,
        after: Option<&MessageId>,
        limit: u32,
    ) -> InboxResult<Vec<Message>> {
        let limit = limit.clamp(1, MAX_FETCH_LIMIT);
        let url = format!("{}/channels/{channel_id}/messages", self.base_url);
        let mut query = vec![("limit", limit.to_string())];
        if let Some(after) = after.filter(|a| !a.as_str().trim().is_empty()) {
            query.push(("after", after.to_string()));
        }

        let mut messages: Vec<Message> = self
            .get_json("discord fetch messages", self.get(&url).query(&query))
            .await?;
        messages.sort_by(|a, b| a.id.cmp(&b.id));
        debug!(count = messages.len(), "fetched messages");
        Ok(messages)
    }

    async fn get_channel(&self, channel_id: &str) -> InboxResult<Channel> {
        let url = format!("{}/channels/{channel_id}", self.base_url);
        self.get_json("discord get channel", self.get(&url)).await
    }

    #[instrument(skip(self), err)]
    async fn acknowledge(&self, channel_id: &str, message_id: &MessageId) -> InboxResult<()> {
        let what = "discord add reaction";
        let url = format!(
            "{}/channels/{channel_id}/messages/{message_id}/reactions/{DONE_REACTION}/@me",
            self.base_url
        );
        let resp = self
            .http
            .put(&url)
            .header(reqwest::header::AUTHORIZATION, format!("Bot {}", self.token))
            .header(reqwest::header::CONTENT_LENGTH, 0)
            .send()
            .await
            .map_err(|e| transport_error(what, e))?;
        if resp.status() != StatusCode::NO_CONTENT {
            return Err(status_error(what, resp).await);
        }
        Ok(())
    }

    /// Streams the body to `<dest>.part` and renames it into place.
    #[instrument(skip(self), fields(dest = %dest.display()), err)]
    async fn download_attachment(&self, url: &str, dest: &Path) -> InboxResult<()> {
        let what = "discord attachment download";
        let mut resp = self
            .get(url)
            .send()
            .await
            .map_err(|e| transport_error(what, e))?;
        if resp.status() != StatusCode::OK {
            return Err(status_error(what, resp).await);
        }

        let io_err = |e: std::io::Error| InboxError::processing(format!("{what}: {}: {e}", dest.display()));
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let partial = partial_path(dest);
        let mut file = tokio::fs::File::create(&partial).await.map_err(io_err)?;
        let mut written = 0usize;
        while let Some(chunk) = resp.chunk().await.map_err(|e| transport_error(what, e))? {
            file.write_all(&chunk).await.map_err(io_err)?;
            written += chunk.len();
        }
        file.flush().await.map_err(io_err)?;
        drop(file);
        tokio::fs::rename(&partial, dest).await.map_err(io_err)?;

        debug!(bytes = written, "attachment downloaded");
        Ok(())
    }

    async fn whoami(&self) -> InboxResult<String> {
        let url = format!("{}/users/@me", self.base_url);
        let user: User = self.get_json("discord me", self.get(&url)).await?;
        Ok(user.username.filter(|u| !u.is_empty()).unwrap_or(user.id))
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut raw = dest.as_os_str().to_os_string();
    raw.push(".part");
    PathBuf::from(raw)
}
