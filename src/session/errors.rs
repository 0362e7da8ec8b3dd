//! Session error types.

use thiserror::Error;

use super::manager::SessionState;
use crate::inference::InferenceError;

/// Errors returned synchronously by `SessionManager` operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The operation needs a connected session.
    #[error("session is not connected")]
    NotConnected,

    /// `start_session` was called while a session is connecting or connected.
    #[error("session already active (state: {state})")]
    AlreadyActive { state: SessionState },

    /// A generation is still running; only one may be in flight per session.
    #[error("a generation is already in flight")]
    GenerationInFlight,

    /// Configuration, availability, or request failure from the inference layer.
    #[error(transparent)]
    Inference(#[from] InferenceError),
}

impl SessionError {
    /// Whether `start_session` failed because the backend could not be reached.
    pub fn is_backend_unavailable(&self) -> bool {
        matches!(
            self,
            SessionError::Inference(InferenceError::BackendUnavailable { .. })
        )
    }
}
