//! HTTP client for the completion backend.

use bytes::Bytes;
use futures::Stream;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::{ApiToken, CredentialManager};
use crate::config::BackendConfig;
use crate::error::{BridgeError, Result};
use crate::logging::mask_token;
use crate::translate::backend_types::BackendRequest;
use crate::translate::canonical::CompletionRequest;

const COMPLETIONS_PATH: &str = "/chat/completions";

pub struct BackendClient {
    http: reqwest::Client,
    endpoint: String,
    editor_version: String,
    integration_id: String,
    max_tokens: u64,
    request_timeout: Duration,
    machine_id: String,
    credentials: Arc<CredentialManager>,
}

impl BackendClient {
    pub fn new(
        http: reqwest::Client,
        config: &BackendConfig,
        credentials: Arc<CredentialManager>,
    ) -> Self {
        Self {
            http,
            endpoint: format!("{}{}", config.base_url.trim_end_matches('/'), COMPLETIONS_PATH),
            editor_version: config.editor_version.clone(),
            integration_id: config.integration_id.clone(),
            max_tokens: config.max_tokens,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            machine_id: uuid::Uuid::new_v4().to_string(),
            credentials,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Non-streaming completion. Returns the backend's JSON object as sent.
    pub async fn complete(&self, req: &CompletionRequest) -> Result<serde_json::Value> {
        let response = self.send(req, false).await?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Streaming completion. Returns the raw `data:` record stream.
    pub async fn complete_streaming(
        &self,
        req: &CompletionRequest,
    ) -> Result<impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static> {
        let response = self.send(req, true).await?;
        Ok(response.bytes_stream())
    }

    async fn send(&self, req: &CompletionRequest, stream: bool) -> Result<reqwest::Response> {
        let token = self.credentials.token().await?;

        let mut body = BackendRequest::from_canonical(req, self.max_tokens);
        body.stream = stream;

        let request_id = uuid::Uuid::new_v4().to_string();
        tracing::debug!(
            model = %body.model,
            stream,
            messages = body.messages.len(),
            request_id = %request_id,
            token = %mask_token(token.secret()),
            "Sending backend request"
        );

        let mut builder = self
            .http
            .post(&self.endpoint)
            .bearer_auth(token.secret())
            .header("Editor-Version", &self.editor_version)
            .header("Copilot-Integration-Id", &self.integration_id)
            .header("VScode-SessionId", session_id())
            .header("VScode-MachineId", &self.machine_id)
            .header("X-Request-Id", &request_id)
            .json(&body);

        if !stream {
            builder = builder.timeout(self.request_timeout);
        }

        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .text()
            .await
            .map_err(|e| tracing::debug!(error = %e, "Failed to read backend error body"))
            .unwrap_or_default();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            self.reauthorize(&token).await;
        }

        tracing::warn!(status = status.as_u16(), request_id = %request_id, "Backend request failed");
        Err(BridgeError::Backend {
            status: status.as_u16(),
            body,
        })
    }

    /// Replace a token the backend rejected. The failed request is not retried.
    async fn reauthorize(&self, stale: &ApiToken) {
        match self.credentials.invalidate(stale).await {
            Ok(_) => tracing::info!("Backend token refreshed after 401"),
            Err(e) => tracing::error!(error = %e, "Re-authorization after 401 failed"),
        }
    }
}

/// Fresh per call: a UUID followed by the current time in milliseconds.
fn session_id() -> String {
    format!(
        "{}{}",
        uuid::Uuid::new_v4(),
        chrono::Utc::now().timestamp_millis()
    )
}
