//! HTTP implementation of the host platform API.
//!
//! Speaks JSON over HTTP to the host's session endpoint. Endpoints:
//!
//! - `POST   {base}/sessions`                  -> `{ "handle": "..." }`
//! - `POST   {base}/sessions/{handle}/prompt`  -> 2xx ack
//! - `GET    {base}/sessions/{handle}/transcript` -> [`Transcript`]
//! - `POST   {base}/sessions/liveness`         -> `{ "<handle>": "idle" | "active" }`
//! - `DELETE {base}/sessions/{handle}`         -> 2xx ack

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{HostPlatform, Liveness, SessionHandle, Transcript};
use crate::error::HostError;

pub struct HttpHost {
    base_url: String,
    http: reqwest::Client,
    request_timeout: Duration,
}

impl HttpHost {
    pub fn new(base_url: &str, request_timeout_secs: u64) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            request_timeout: Duration::from_secs(request_timeout_secs),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Map a transport-level failure to [`HostError::Unreachable`].
    fn transport_err(&self, path: &str, e: reqwest::Error) -> HostError {
        HostError::Unreachable {
            url: self.url(path),
            message: e.to_string(),
        }
    }
}

/// Map non-2xx responses to typed errors. 404 on a session path means the
/// handle is unknown to the host.
async fn check_status(resp: reqwest::Response, handle: Option<&str>) -> Result<reqwest::Response, HostError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == reqwest::StatusCode::NOT_FOUND {
        if let Some(handle) = handle {
            return Err(HostError::UnknownSession(handle.to_string()));
        }
    }
    let message = resp.text().await.unwrap_or_default();
    Err(HostError::Rejected {
        status: status.as_u16(),
        message,
    })
}

#[derive(Deserialize)]
struct CreateSessionResponse {
    handle: String,
}

#[async_trait]
impl HostPlatform for HttpHost {
    async fn create_session(
        &self,
        parent: Option<&str>,
        title: &str,
    ) -> Result<SessionHandle, HostError> {
        let path = "/sessions";
        let resp = self
            .http
            .post(self.url(path))
            .timeout(self.request_timeout)
            .json(&serde_json::json!({ "parent": parent, "title": title }))
            .send()
            .await
            .map_err(|e| self.transport_err(path, e))?;
        let resp = check_status(resp, None).await?;

        let body: CreateSessionResponse = resp
            .json()
            .await
            .map_err(|e| HostError::BadResponse(e.to_string()))?;
        Ok(body.handle)
    }

    async fn dispatch_prompt(
        &self,
        handle: &str,
        role: &str,
        content: &str,
        model: Option<&str>,
    ) -> Result<(), HostError> {
        let path = format!("/sessions/{handle}/prompt");
        let resp = self
            .http
            .post(self.url(&path))
            .timeout(self.request_timeout)
            .json(&serde_json::json!({
                "role": role,
                "content": content,
                "model": model,
            }))
            .send()
            .await
            .map_err(|e| self.transport_err(&path, e))?;
        check_status(resp, Some(handle)).await?;
        Ok(())
    }

    async fn fetch_transcript(&self, handle: &str) -> Result<Transcript, HostError> {
        let path = format!("/sessions/{handle}/transcript");
        let resp = self
            .http
            .get(self.url(&path))
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| self.transport_err(&path, e))?;
        let resp = check_status(resp, Some(handle)).await?;

        resp.json::<Transcript>()
            .await
            .map_err(|e| HostError::BadResponse(e.to_string()))
    }

    async fn poll_liveness(
        &self,
        handles: &[SessionHandle],
    ) -> Result<HashMap<SessionHandle, Liveness>, HostError> {
        let path = "/sessions/liveness";
        let resp = self
            .http
            .post(self.url(path))
            .timeout(self.request_timeout)
            .json(&serde_json::json!({ "handles": handles }))
            .send()
            .await
            .map_err(|e| self.transport_err(path, e))?;
        let resp = check_status(resp, None).await?;

        resp.json::<HashMap<SessionHandle, Liveness>>()
            .await
            .map_err(|e| HostError::BadResponse(e.to_string()))
    }

    async fn abort(&self, handle: &str) -> Result<(), HostError> {
        let path = format!("/sessions/{handle}");
        let resp = self
            .http
            .delete(self.url(&path))
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| self.transport_err(&path, e))?;
        check_status(resp, Some(handle)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let host = HttpHost::new("http://localhost:7070/", 5);
        assert_eq!(host.url("/sessions"), "http://localhost:7070/sessions");
    }
}
