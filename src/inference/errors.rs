//! Inference error types.
//!
//! All errors implement `std::error::Error` via `thiserror`. Structured logging
//! is the caller's responsibility; these types carry the context needed to build
//! meaningful log entries.

use thiserror::Error;

/// Errors that can occur during inference operations.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// One or more configuration rules failed. Raised before any network activity.
    #[error("invalid configuration: {}", errors.join("; "))]
    ConfigurationError {
        errors: Vec<String>,
    },

    /// The availability probe reported the backend as unreachable.
    #[error("backend unavailable at {endpoint}")]
    BackendUnavailable {
        endpoint: String,
    },

    /// TCP/HTTP connection to the model endpoint failed.
    #[error("connection failed to {endpoint}: {reason}")]
    ConnectionFailed {
        endpoint: String,
        reason: String,
    },

    /// The model endpoint did not respond within the configured timeout.
    #[error("inference timeout after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },

    /// Non-2xx HTTP response from the model endpoint.
    #[error("HTTP {status}: {body}")]
    HttpError {
        status: u16,
        body: String,
    },

    /// The chat endpoint answered 2xx but the top-level payload was unusable.
    #[error("malformed response: {reason}")]
    MalformedResponse {
        reason: String,
    },

    /// Transport read failure or backend-reported error mid-stream.
    #[error("stream error: {reason}")]
    StreamError {
        reason: String,
    },

    /// Cooperative cancellation was observed. Not a failure: the session
    /// layer turns this into `GenerationOutcome::Cancelled`.
    #[error("generation cancelled")]
    Cancelled,

    /// The background generation task panicked or was aborted.
    #[error("generation aborted: {reason}")]
    GenerationAborted {
        reason: String,
    },
}

impl InferenceError {
    /// Whether this error belongs to the request-failed class: the chat call
    /// was attempted and did not produce a usable response.
    pub fn is_request_failure(&self) -> bool {
        matches!(
            self,
            InferenceError::ConnectionFailed { .. }
                | InferenceError::Timeout { .. }
                | InferenceError::HttpError { .. }
                | InferenceError::MalformedResponse { .. }
                | InferenceError::StreamError { .. }
        )
    }

    /// Whether a fresh attempt at the same request may succeed.
    ///
    /// HTTP 404 is excluded: Ollama returns it when the model isn't pulled,
    /// and retrying against the same backend will not install it.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            InferenceError::ConnectionFailed { .. }
                | InferenceError::Timeout { .. }
                | InferenceError::HttpError { status: 500, .. }
                | InferenceError::HttpError { status: 502..=504, .. }
        )
    }

    /// Response body returned with a non-2xx status.
    pub fn error_body(&self) -> Option<&str> {
        match self {
            InferenceError::HttpError { body, .. } => Some(body),
            _ => None,
        }
    }
}
