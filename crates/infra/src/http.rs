//! Helpers shared by the HTTP clients.

use std::time::Duration;

use reqwest::Response;

use voice_inbox_core::InboxError;

/// Per-request ceiling; callers add tighter deadlines around whole operations.
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const ERROR_BODY_LIMIT: usize = 4096;

/// Turn a non-success response into a network error carrying the status and
/// the start of the body.
pub(crate) async fn status_error(what: &str, mut resp: Response) -> InboxError {
    let status = resp.status();
    let mut body = Vec::new();
    while body.len() < ERROR_BODY_LIMIT {
        match resp.chunk().await {
            Ok(Some(chunk)) => body.extend_from_slice(&chunk),
            _ => break,
        }
    }
    body.truncate(ERROR_BODY_LIMIT);
    let body = String::from_utf8_lossy(&body);
    InboxError::network(format!("{what} failed: {status}: {}", body.trim()))
}

pub(crate) fn transport_error(what: &str, err: reqwest::Error) -> InboxError {
    if err.is_timeout() {
        InboxError::timeout(format!("{what}: {err}"))
    } else {
        InboxError::network(format!("{what}: {err}"))
    }
}
