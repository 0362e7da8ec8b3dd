//! Inference: everything that talks to the local model backend.
//!
//! - Backend configuration, validation, and loading (`config`)
//! - Known models and memory-fit heuristics (`catalog`)
//! - Provider-specific paths and headers (`provider`)
//! - The injectable HTTP seam (`transport`)
//! - Availability probing (`probe`)
//! - NDJSON stream parsing (`streaming`)
//! - Single-shot and streaming chat calls with retries (`client`)
//!
//! Every provider speaks the same normalized chat contract, so switching
//! from Ollama to LM Studio is a config change, not a code change.

pub mod catalog;
pub mod client;
pub mod config;
pub mod errors;
pub mod probe;
pub mod provider;
pub mod streaming;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use catalog::{format_size, ModelCatalog, ModelDescriptor};
pub use client::InferenceClient;
pub use config::{
    validate, BackendConfig, ProviderConfig, ProviderKind, ProviderSettings, ValidationReport,
};
pub use errors::InferenceError;
pub use probe::AvailabilityProbe;
pub use streaming::{parse_ndjson_stream, FragmentStream};
pub use transport::{ReqwestTransport, Transport, TransportRequest, TransportResponse};
pub use types::{ConversationMessage, ProviderStatus, Role};
