//! Session: one conversation with a local backend.
//!
//! `SessionManager` owns the history and the connection state and dispatches
//! generations through an `InferenceClient`. Compaction is a separate,
//! explicit step (`history`).

pub mod errors;
pub mod history;
pub mod manager;

pub use errors::SessionError;
pub use history::{compact_history, DEFAULT_KEEP_RECENT};
pub use manager::{GenerationHandle, GenerationOutcome, SessionManager, SessionState};
