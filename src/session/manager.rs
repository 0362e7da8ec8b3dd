//! SessionManager: one logical conversation with a local backend.
//!
//! Responsibilities:
//! - Session lifecycle: `Disconnected → Connecting → Connected → Disconnected`
//! - Sole ownership of the conversation history
//! - Dispatching generations (single-shot or streaming) in the background
//! - Cancelling in-flight work when the session ends
//!
//! History lives behind a `std::sync::Mutex` that is never held across an
//! `.await`. Appending a generation's reply and checking its cancellation
//! token happen under the same lock as `end_session`, so a cancelled
//! generation can never append.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::inference::{
    BackendConfig, ConversationMessage, InferenceClient, InferenceError, ProviderStatus, Transport,
};

use super::errors::SessionError;
use super::history;

// ─── Public Types ────────────────────────────────────────────────────────────

/// Connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
        };
        f.write_str(s)
    }
}

/// How a generation ended, when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    /// The assistant message that was appended to history.
    Completed(ConversationMessage),
    /// The session ended (or was dropped) first; nothing was appended.
    Cancelled,
}

/// Result channel of one generation.
///
/// Fragments arrive as they are produced (a single fragment with the whole
/// reply on the single-shot path). Dropping the handle does not stop the
/// generation; ending the session does.
#[derive(Debug)]
pub struct GenerationHandle {
    id: u64,
    fragments: mpsc::UnboundedReceiver<String>,
    task: JoinHandle<Result<GenerationOutcome, InferenceError>>,
}

impl GenerationHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next text fragment, or `None` once the generation has stopped producing.
    pub async fn next_fragment(&mut self) -> Option<String> {
        self.fragments.recv().await
    }

    /// Wait for the generation to finish.
    pub async fn outcome(self) -> Result<GenerationOutcome, InferenceError> {
        self.task
            .await
            .map_err(|e| InferenceError::GenerationAborted {
                reason: e.to_string(),
            })?
    }
}

// ─── SessionManager ──────────────────────────────────────────────────────────

struct Shared {
    state: SessionState,
    history: Vec<ConversationMessage>,
    status: ProviderStatus,
    /// Replaced on every successful `start_session`; cancelled by `end_session`.
    cancel: CancellationToken,
    in_flight: Option<u64>,
    next_generation: u64,
    /// Bumped by every `start_session`; only the latest attempt may connect.
    connect_attempt: u64,
}

/// Owns the state of one conversation.
pub struct SessionManager {
    session_id: String,
    client: InferenceClient,
    shared: Arc<Mutex<Shared>>,
}

impl SessionManager {
    /// Create a disconnected session. Fails with `ConfigurationError` before
    /// any network activity if the config does not validate.
    pub fn new(config: BackendConfig, transport: Arc<dyn Transport>) -> Result<Self, SessionError> {
        Ok(Self::with_client(InferenceClient::new(config, transport)?))
    }

    /// Create a disconnected session talking to the backend over HTTP.
    pub fn with_reqwest(config: BackendConfig) -> Result<Self, SessionError> {
        Ok(Self::with_client(InferenceClient::with_reqwest(config)?))
    }

    pub fn with_client(client: InferenceClient) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            client,
            shared: Arc::new(Mutex::new(Shared {
                state: SessionState::Disconnected,
                history: Vec::new(),
                status: ProviderStatus::default(),
                cancel: CancellationToken::new(),
                in_flight: None,
                next_generation: 1,
                connect_attempt: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        lock_shared(&self.shared)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn client(&self) -> &InferenceClient {
        &self.client
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn status(&self) -> ProviderStatus {
        self.lock().status.clone()
    }

    /// Snapshot of the conversation. Mutating it never affects the session.
    pub fn history(&self) -> Vec<ConversationMessage> {
        self.lock().history.clone()
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Probe the backend and, if it answers, connect the session.
    ///
    /// `seed_context` becomes the first (`system`) message of the history.
    pub async fn start_session(&self, seed_context: Option<&str>) -> Result<(), SessionError> {
        let attempt = {
            let mut shared = self.lock();
            if shared.state != SessionState::Disconnected {
                return Err(SessionError::AlreadyActive {
                    state: shared.state,
                });
            }
            shared.state = SessionState::Connecting;
            shared.connect_attempt += 1;
            shared.connect_attempt
        };

        tracing::info!(
            session_id = %self.session_id,
            endpoint = %self.client.endpoint(),
            provider = %self.client.config().provider_kind(),
            "starting session"
        );

        let available = self.client.check_available().await;

        let mut shared = self.lock();
        if shared.state != SessionState::Connecting || shared.connect_attempt != attempt {
            // end_session ran while the probe was in flight, and possibly a
            // newer start_session after it.
            tracing::debug!(session_id = %self.session_id, attempt, "superseded session start");
            return Err(InferenceError::Cancelled.into());
        }

        shared.status.available = available;
        if !available {
            let err = InferenceError::BackendUnavailable {
                endpoint: self.client.endpoint().to_string(),
            };
            shared.state = SessionState::Disconnected;
            shared.status.connected = false;
            shared.status.last_error = Some(err.to_string());
            tracing::warn!(session_id = %self.session_id, error = %err, "session start failed");
            return Err(err.into());
        }

        shared.history.clear();
        if let Some(seed) = seed_context {
            shared.history.push(ConversationMessage::system(seed));
        }
        shared.cancel = CancellationToken::new();
        shared.state = SessionState::Connected;
        shared.status.connected = true;
        shared.status.last_connected_at = Some(Utc::now());
        shared.status.last_error = None;
        shared.status.current_model = Some(self.client.model_id().to_string());

        tracing::info!(
            session_id = %self.session_id,
            model = %self.client.model_id(),
            seeded = seed_context.is_some(),
            "session connected"
        );
        Ok(())
    }

    /// End the session: cancel any in-flight generation and clear history.
    /// Safe to call in any state.
    pub fn end_session(&self) {
        let mut shared = self.lock();
        shared.cancel.cancel();
        shared.history.clear();
        shared.in_flight = None;
        shared.state = SessionState::Disconnected;
        shared.status.connected = false;
        tracing::info!(session_id = %self.session_id, "session ended");
    }

    // ─── Messages ────────────────────────────────────────────────────────

    /// Append a user message and start generating the reply in the background.
    ///
    /// Returns immediately with the generation's result channel. Must be
    /// called from within a Tokio runtime. History is left untouched when
    /// the session is not connected or a generation is already running.
    pub fn send_message(&self, text: impl Into<String>) -> Result<GenerationHandle, SessionError> {
        let (id, messages, cancel) = {
            let mut shared = self.lock();
            if shared.state != SessionState::Connected {
                return Err(SessionError::NotConnected);
            }
            if shared.in_flight.is_some() {
                return Err(SessionError::GenerationInFlight);
            }
            shared.history.push(ConversationMessage::user(text));
            let id = shared.next_generation;
            shared.next_generation += 1;
            shared.in_flight = Some(id);
            (id, shared.history.clone(), shared.cancel.clone())
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let generation = Generation {
            id,
            session_id: self.session_id.clone(),
            client: self.client.clone(),
            shared: self.shared.clone(),
            messages,
            cancel,
            fragments: tx,
        };
        let task = tokio::spawn(generation.run());

        Ok(GenerationHandle {
            id,
            fragments: rx,
            task,
        })
    }

    /// Append a `system` message without triggering generation.
    pub fn send_context_update(&self, text: impl Into<String>) -> Result<(), SessionError> {
        let mut shared = self.lock();
        if shared.state != SessionState::Connected {
            return Err(SessionError::NotConnected);
        }
        shared.history.push(ConversationMessage::system(text));
        Ok(())
    }

    /// Drop all but the seed context and the last `keep_recent` messages.
    /// Returns how many messages were removed.
    pub fn compact_history(&self, keep_recent: usize) -> usize {
        let mut shared = self.lock();
        let compacted = history::compact_history(&shared.history, keep_recent);
        let removed = shared.history.len() - compacted.len();
        shared.history = compacted;
        if removed > 0 {
            tracing::debug!(session_id = %self.session_id, removed, "compacted history");
        }
        removed
    }

    // ─── Telemetry ───────────────────────────────────────────────────────

    /// Probe the backend now and return fresh telemetry. Session state is
    /// not touched, so this may run alongside a generation.
    pub async fn check_status(&self) -> ProviderStatus {
        let available = self.client.check_available().await;
        let mut status = self.status();
        status.available = available;
        status
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.lock().cancel.cancel();
    }
}

fn lock_shared(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

// ─── Generation ──────────────────────────────────────────────────────────────

/// Everything a background generation needs, moved into its task.
struct Generation {
    id: u64,
    session_id: String,
    client: InferenceClient,
    shared: Arc<Mutex<Shared>>,
    messages: Vec<ConversationMessage>,
    cancel: CancellationToken,
    fragments: mpsc::UnboundedSender<String>,
}

/// Clears the in-flight marker on every exit path, unless the session has
/// already moved on to another generation.
struct InFlightGuard {
    id: u64,
    shared: Arc<Mutex<Shared>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut shared = lock_shared(&self.shared);
        if shared.in_flight == Some(self.id) {
            shared.in_flight = None;
        }
    }
}

impl Generation {
    async fn run(self) -> Result<GenerationOutcome, InferenceError> {
        let _guard = InFlightGuard {
            id: self.id,
            shared: self.shared.clone(),
        };

        let streaming = self.client.config().stream;
        tracing::debug!(
            session_id = %self.session_id,
            generation = self.id,
            streaming,
            "generation started"
        );

        let result = if streaming {
            self.stream_reply().await
        } else {
            self.single_reply().await
        };

        let mut shared = lock_shared(&self.shared);
        match result {
            _ if self.cancel.is_cancelled() => {
                tracing::debug!(session_id = %self.session_id, generation = self.id, "generation cancelled");
                Ok(GenerationOutcome::Cancelled)
            }
            Ok(message) => {
                shared.history.push(message.clone());
                shared.status.last_error = None;
                tracing::info!(
                    session_id = %self.session_id,
                    generation = self.id,
                    chars = message.content.chars().count(),
                    "generation completed"
                );
                Ok(GenerationOutcome::Completed(message))
            }
            Err(InferenceError::Cancelled) => Ok(GenerationOutcome::Cancelled),
            Err(e) => {
                shared.status.last_error = Some(e.to_string());
                tracing::warn!(
                    session_id = %self.session_id,
                    generation = self.id,
                    error = %e,
                    "generation failed"
                );
                Err(e)
            }
        }
    }

    async fn single_reply(&self) -> Result<ConversationMessage, InferenceError> {
        let message = self.client.chat(&self.messages, &self.cancel).await?;
        // The receiver may already be gone; the reply still lands in history.
        let _ = self.fragments.send(message.content.clone());
        Ok(message)
    }

    async fn stream_reply(&self) -> Result<ConversationMessage, InferenceError> {
        let mut stream = self.client.chat_stream(&self.messages, &self.cancel).await?;
        let mut content = String::new();
        while let Some(fragment) = stream.next().await {
            let fragment = fragment?;
            content.push_str(&fragment);
            let _ = self.fragments.send(fragment);
        }
        Ok(ConversationMessage::assistant(content))
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
