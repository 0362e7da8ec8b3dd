//! Shared types for the inference client.
//!
//! These describe the normalized chat contract every provider speaks:
//! conversation messages, the request body, the single-shot response, and
//! the NDJSON records of a streaming response.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Conversation ────────────────────────────────────────────────────────────

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single message in the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
}

impl ConversationMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

// ─── Request Types ───────────────────────────────────────────────────────────

/// Runtime hints forwarded to the backend when the caller configured them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu_enabled: Option<bool>,
}

impl RuntimeOptions {
    pub fn is_empty(&self) -> bool {
        self.context_size.is_none() && self.thread_count.is_none() && self.gpu_enabled.is_none()
    }
}

/// Request body for `POST {endpoint}{chat_path}`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ConversationMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<RuntimeOptions>,
}

// ─── Response Types ──────────────────────────────────────────────────────────

/// Message payload inside a chat response or stream record.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub content: Option<String>,
}

/// Single-shot chat response: `{ message: { role, content }, done: true }`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    pub message: Option<ResponseMessage>,
    #[serde(default)]
    pub done: bool,
}

/// One NDJSON record of a streaming chat response.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamRecord {
    #[serde(default)]
    pub message: Option<ResponseMessage>,
    #[serde(default)]
    pub done: bool,
    /// Ollama reports mid-stream failures as `{"error": "..."}`.
    #[serde(default)]
    pub error: Option<String>,
}

/// Model-listing response: `{ models: [{ name, ... }] }`.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelListResponse {
    #[serde(default)]
    pub models: Vec<ListedModel>,
}

/// A single entry of the model-listing response. Extra fields are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct ListedModel {
    pub name: String,
}

// ─── Telemetry ───────────────────────────────────────────────────────────────

/// Read-only provider telemetry surfaced to callers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    pub available: bool,
    pub connected: bool,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub current_model: Option<String>,
}

// ─── Tests ───────────────────────────────────────────────────────────────────
