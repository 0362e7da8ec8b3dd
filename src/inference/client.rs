//! Inference client for the normalized chat contract.
//!
//! Builds chat requests from a validated `BackendConfig` plus the
//! conversation so far, and issues them as single-shot or streaming calls
//! through the injected [`Transport`]. Establishing a request is retried up to
//! `max_retries` times on transient failures; a stream that has started is
//! never retried.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::config::BackendConfig;
use super::errors::InferenceError;
use super::probe::AvailabilityProbe;
use super::provider::join_url;
use super::streaming::{parse_ndjson_stream, FragmentStream};
use super::transport::{ReqwestTransport, Transport, TransportRequest, TransportResponse};
use super::types::{ChatRequest, ChatResponse, ConversationMessage, Role, RuntimeOptions};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Minimum total timeout for streaming calls.
///
/// Local models can take a long time to emit the first token on a large
/// context, and the whole body has to arrive within the transport timeout.
const STREAM_REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

/// Base delay between retries; multiplied by the attempt number.
const RETRY_BACKOFF: Duration = Duration::from_millis(250);

// ─── InferenceClient ─────────────────────────────────────────────────────────

/// Client for one configured backend.
#[derive(Clone)]
pub struct InferenceClient {
    config: BackendConfig,
    transport: Arc<dyn Transport>,
    probe: AvailabilityProbe,
}

impl InferenceClient {
    /// Create a client. Fails with `ConfigurationError` before any network
    /// activity if the config does not validate.
    pub fn new(config: BackendConfig, transport: Arc<dyn Transport>) -> Result<Self, InferenceError> {
        let config = config.validated()?;
        let probe = AvailabilityProbe::new(transport.clone(), config.provider.models_path())
            .with_headers(config.provider.request_headers());
        Ok(Self {
            config,
            transport,
            probe,
        })
    }

    /// Create a client backed by [`ReqwestTransport`].
    pub fn with_reqwest(config: BackendConfig) -> Result<Self, InferenceError> {
        let transport = ReqwestTransport::new()?;
        Self::new(config, Arc::new(transport))
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn endpoint(&self) -> &str {
        self.config.endpoint()
    }

    pub fn model_id(&self) -> &str {
        self.config.model_id()
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }

    // ─── Health Check ────────────────────────────────────────────────────

    /// Check whether the backend is reachable. Never errors.
    pub async fn check_available(&self) -> bool {
        self.probe.check_available(self.endpoint(), self.timeout()).await
    }

    /// Names of the models installed on the backend.
    pub async fn list_models(&self) -> Result<Vec<String>, InferenceError> {
        self.probe.list_models(self.endpoint(), self.timeout()).await
    }

    // ─── Request Building ────────────────────────────────────────────────

    /// Build the request body for `messages` using the configured tunables.
    pub fn build_request(&self, messages: &[ConversationMessage], stream: bool) -> ChatRequest {
        let options = RuntimeOptions {
            context_size: self.config.context_size,
            thread_count: self.config.thread_count,
            gpu_enabled: self.config.gpu_enabled,
        };
        ChatRequest {
            model: self.config.model_id().to_string(),
            messages: messages.to_vec(),
            temperature: Some(self.config.temperature),
            max_tokens: Some(self.config.max_tokens),
            stream,
            options: if options.is_empty() { None } else { Some(options) },
        }
    }

    // ─── Chat (non-streaming) ────────────────────────────────────────────

    /// Send a single-shot chat request and return the assistant message.
    pub async fn chat(
        &self,
        messages: &[ConversationMessage],
        cancel: &CancellationToken,
    ) -> Result<ConversationMessage, InferenceError> {
        let body = self.build_request(messages, false);
        let response = self.send_with_retries(&body, self.timeout(), cancel).await?;

        let text = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(InferenceError::Cancelled),
            text = response.text() => text?,
        };

        parse_chat_response(&text)
    }

    // ─── Chat (streaming) ────────────────────────────────────────────────

    /// Send a streaming chat request and return the fragment stream.
    pub async fn chat_stream(
        &self,
        messages: &[ConversationMessage],
        cancel: &CancellationToken,
    ) -> Result<FragmentStream, InferenceError> {
        let body = self.build_request(messages, true);
        let timeout = self.timeout().max(STREAM_REQUEST_TIMEOUT);
        let response = self.send_with_retries(&body, timeout, cancel).await?;
        Ok(parse_ndjson_stream(response.body, cancel.clone()))
    }

    // ─── Transport ───────────────────────────────────────────────────────

    /// Issue the chat request, retrying transient failures.
    async fn send_with_retries(
        &self,
        body: &ChatRequest,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<TransportResponse, InferenceError> {
        let url = join_url(self.endpoint(), self.config.provider.chat_path());

        tracing::info!(
            url = %url,
            model = %body.model,
            message_count = body.messages.len(),
            max_tokens = ?body.max_tokens,
            stream = body.stream,
            "=== LLM REQUEST ==="
        );

        let mut attempt: u32 = 0;
        loop {
            let request = TransportRequest::post_json(&url, body, timeout)?
                .with_headers(self.config.provider.request_headers());

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(InferenceError::Cancelled),
                result = tokio::time::timeout(timeout, self.transport.send(request)) => result,
            };

            let outcome = match result {
                Ok(Ok(response)) if response.is_success() => return Ok(response),
                Ok(Ok(response)) => {
                    let status = response.status;
                    let body_text = response.text().await.unwrap_or_default();
                    InferenceError::HttpError {
                        status,
                        body: body_text,
                    }
                }
                Ok(Err(e)) => e,
                Err(_) => InferenceError::Timeout {
                    duration_ms: timeout.as_millis() as u64,
                },
            };

            if !outcome.is_retriable() || attempt >= self.config.max_retries {
                tracing::warn!(
                    url = %url,
                    attempt,
                    error = %outcome,
                    body = outcome.error_body().unwrap_or(""),
                    "chat request failed"
                );
                return Err(outcome);
            }

            attempt += 1;
            tracing::warn!(
                url = %url,
                attempt,
                max_retries = self.config.max_retries,
                error = %outcome,
                "chat request failed, retrying"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(InferenceError::Cancelled),
                _ = tokio::time::sleep(RETRY_BACKOFF * attempt) => {}
            }
        }
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

/// Parse a single-shot chat response body into the assistant message.
pub fn parse_chat_response(body: &str) -> Result<ConversationMessage, InferenceError> {
    let resp: ChatResponse =
        serde_json::from_str(body).map_err(|e| InferenceError::MalformedResponse {
            reason: format!("failed to parse chat response: {e}"),
        })?;

    let message = resp.message.ok_or(InferenceError::MalformedResponse {
        reason: "response has no message".into(),
    })?;

    if let Some(role) = message.role {
        if role != Role::Assistant {
            return Err(InferenceError::MalformedResponse {
                reason: format!("expected assistant message, got {role:?}"),
            });
        }
    }

    let content = message.content.ok_or(InferenceError::MalformedResponse {
        reason: "response message has no content".into(),
    })?;

    Ok(ConversationMessage::assistant(content))
}

// ─── Tests ───────────────────────────────────────────────────────────────────
