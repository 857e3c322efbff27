//! Obsidian Local REST API client (document store).

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use tracing::instrument;

use voice_inbox_core::{DocumentStore, InboxError, InboxResult};

use crate::http::{status_error, transport_error, REQUEST_TIMEOUT};

const MARKDOWN: &str = "text/markdown; charset=utf-8";

#[derive(Debug, Deserialize)]
struct Health {
    #[serde(default)]
    authenticated: bool,
}

#[derive(Clone)]
pub struct ObsidianClient {
    http: reqwest::Client,
    base_url: String,
    auth_header: String,
    api_key: String,
}

impl std::fmt::Debug for ObsidianClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObsidianClient")
            .field("base_url", &self.base_url)
            .field("auth_header", &self.auth_header)
            .finish_non_exhaustive()
    }
}

impl ObsidianClient {
    /// `verify_tls = false` accepts the plugin's self-signed certificate.
    pub fn new(
        base_url: impl Into<String>,
        auth_header: impl Into<String>,
        api_key: impl Into<String>,
        verify_tls: bool,
    ) -> InboxResult<Self> {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(!verify_tls)
            .build()
            .map_err(|e| InboxError::config(format!("obsidian http client: {e}")))?;
        Ok(Self {
            http,
            base_url,
            auth_header: auth_header.into(),
            api_key: api_key.into(),
        })
    }

    fn request(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        let req = self.http.request(method, url);
        if self.auth_header.is_empty() {
            req
        } else {
            req.header(self.auth_header.as_str(), format!("Bearer {}", self.api_key))
        }
    }

    fn vault_url(&self, vault_path: &str) -> String {
        format!("{}/vault/{}", self.base_url, encode_vault_path(vault_path))
    }

    async fn write(&self, what: &str, method: Method, vault_path: &str, content: &str) -> InboxResult<()> {
        let resp = self
            .request(method, &self.vault_url(vault_path))
            .header(reqwest::header::CONTENT_TYPE, MARKDOWN)
            .body(content.to_string())
            .send()
            .await
            .map_err(|e| transport_error(what, e))?;
        match resp.status() {
            StatusCode::OK | StatusCode::CREATED | StatusCode::NO_CONTENT => Ok(()),
            _ => Err(status_error(what, resp).await),
        }
    }
}

/// Percent-encode each path segment, keeping the separators.
pub fn encode_vault_path(vault_path: &str) -> String {
    vault_path
        .trim_start_matches('/')
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[async_trait]
impl DocumentStore for ObsidianClient {
    async fn file_exists(&self, vault_path: &str) -> InboxResult<bool> {
        let what = "obsidian file exists check";
        let resp = self
            .request(Method::GET, &self.vault_url(vault_path))
            .send()
            .await
            .map_err(|e| transport_error(what, e))?;
        match resp.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(status_error(what, resp).await),
        }
    }

    #[instrument(skip(self, content), err)]
    async fn create_file(&self, vault_path: &str, content: &str) -> InboxResult<()> {
        self.write("obsidian create file", Method::PUT, vault_path, content)
            .await
    }

    #[instrument(skip(self, content), err)]
    async fn append_file(&self, vault_path: &str, content: &str) -> InboxResult<()> {
        self.write("obsidian append", Method::POST, vault_path, content)
            .await
    }

    async fn read_file(&self, vault_path: &str) -> InboxResult<String> {
        let what = "obsidian read";
        let resp = self
            .request(Method::GET, &self.vault_url(vault_path))
            .send()
            .await
            .map_err(|e| transport_error(what, e))?;
        if resp.status() != StatusCode::OK {
            return Err(status_error(what, resp).await);
        }
        resp.text().await.map_err(|e| transport_error(what, e))
    }

    async fn health(&self) -> InboxResult<()> {
        let what = "obsidian health";
        let resp = self
            .request(Method::GET, &format!("{}/", self.base_url))
            .send()
            .await
            .map_err(|e| transport_error(what, e))?;
        if resp.status() != StatusCode::OK {
            return Err(status_error(what, resp).await);
        }
        let health: Health = resp
            .json()
            .await
            .map_err(|e| InboxError::network(format!("{what}: invalid response body: {e}")))?;
        if health.authenticated {
            Ok(())
        } else {
            Err(InboxError::network(format!("{what}: API key not accepted")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> ObsidianClient {
        ObsidianClient::new(server.uri(), "Authorization", "vault-key", true).unwrap()
    }

    #[test]
    fn vault_paths_are_encoded_per_segment() {
        assert_eq!(
            encode_vault_path("/01_Projects/Journal/2026-10-19.md"),
            "01_Projects/Journal/2026-10-19.md"
        );
        assert_eq!(encode_vault_path("My Notes/日記/a b.md"), "My%20Notes/%E6%97%A5%E8%A8%98/a%20b.md");
        assert_eq!(encode_vault_path("a#b/c?d.md"), "a%23b/c%3Fd.md");
    }

    #[tokio::test]
    async fn file_exists_maps_200_and_404() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/vault/Journal/present.md"))
            .and(header("authorization", "Bearer vault-key"))
            .respond_with(ResponseTemplate::new(200).set_body_string("# hi"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/vault/Journal/missing.md"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/vault/Journal/broken.md"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = client(&server);
        assert!(client.file_exists("Journal/present.md").await.unwrap());
        assert!(!client.file_exists("Journal/missing.md").await.unwrap());
        let err = client.file_exists("Journal/broken.md").await.unwrap_err();
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn create_and_append_accept_any_success_status() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/vault/Journal/2026-10-19.md"))
            .and(body_string("front matter"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/vault/Journal/2026-10-19.md"))
            .and(header("content-type", MARKDOWN))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server);
        client
            .create_file("Journal/2026-10-19.md", "front matter")
            .await
            .unwrap();
        client
            .append_file("Journal/2026-10-19.md", "entry")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn custom_auth_header_is_used() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/vault/a.md"))
            .and(header("x-api-key", "Bearer vault-key"))
            .respond_with(ResponseTemplate::new(200).set_body_string("body text"))
            .mount(&server)
            .await;

        let client = ObsidianClient::new(server.uri(), "X-Api-Key", "vault-key", true).unwrap();
        assert_eq!(client.read_file("a.md").await.unwrap(), "body text");
    }

    #[tokio::test]
    async fn health_requires_authenticated_flag() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"authenticated": false})),
            )
            .mount(&server)
            .await;

        let err = client(&server).health().await.unwrap_err();
        assert!(err.to_string().contains("not accepted"));
    }
}
