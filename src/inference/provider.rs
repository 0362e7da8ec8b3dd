//! Provider dispatch.
//!
//! Each backend kind resolves its own model-listing and chat paths and its
//! auth headers; the request and response bodies are the same normalized
//! contract for all of them. Enum dispatch over [`ProviderConfig`] keeps the
//! set closed: adding a backend = new variant + new arms here.

use super::config::{ProviderConfig, ProviderKind};

const OLLAMA_MODELS_PATH: &str = "/api/tags";
const OLLAMA_CHAT_PATH: &str = "/api/chat";
const OPENAI_MODELS_PATH: &str = "/v1/models";
const OPENAI_CHAT_PATH: &str = "/v1/chat/completions";

/// Default base URL for each provider kind, used by callers that build a
/// config without an explicit endpoint.
pub fn default_endpoint(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::Ollama | ProviderKind::Custom => "http://localhost:11434",
        ProviderKind::LmStudio => "http://localhost:1234",
        ProviderKind::LocalAiServer => "http://localhost:8080",
        ProviderKind::OpenAiCompatible => "http://localhost:8000",
    }
}

impl ProviderConfig {
    /// Path of the model-listing surface probed for availability.
    pub fn models_path(&self) -> &str {
        if let Some(path) = self.settings().models_path.as_deref() {
            return path;
        }
        match self {
            ProviderConfig::Ollama(_) | ProviderConfig::Custom(_) => OLLAMA_MODELS_PATH,
            ProviderConfig::LmStudio(_)
            | ProviderConfig::LocalAiServer(_)
            | ProviderConfig::OpenAiCompatible(_) => OPENAI_MODELS_PATH,
        }
    }

    /// Path of the chat surface.
    pub fn chat_path(&self) -> &str {
        if let Some(path) = self.settings().chat_path.as_deref() {
            return path;
        }
        match self {
            ProviderConfig::Ollama(_) | ProviderConfig::Custom(_) => OLLAMA_CHAT_PATH,
            ProviderConfig::LmStudio(_)
            | ProviderConfig::LocalAiServer(_)
            | ProviderConfig::OpenAiCompatible(_) => OPENAI_CHAT_PATH,
        }
    }

    /// Headers sent with every request: bearer auth when an API key is
    /// configured, then any configured extras.
    pub fn request_headers(&self) -> Vec<(String, String)> {
        let settings = self.settings();
        let mut headers = Vec::with_capacity(settings.headers.len() + 1);
        if let Some(key) = settings.api_key.as_deref().filter(|k| !k.is_empty()) {
            headers.push(("Authorization".to_string(), format!("Bearer {key}")));
        }
        headers.extend(settings.headers.iter().map(|(k, v)| (k.clone(), v.clone())));
        headers
    }
}

/// Join a base URL and a path with exactly one `/` between them.
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::config::ProviderSettings;

    #[test]
    fn test_paths_per_provider() {
        let ollama = ProviderConfig::Ollama(ProviderSettings::default());
        assert_eq!(ollama.models_path(), "/api/tags");
        assert_eq!(ollama.chat_path(), "/api/chat");

        let lm = ProviderConfig::LmStudio(ProviderSettings::default());
        assert_eq!(lm.models_path(), "/v1/models");
        assert_eq!(lm.chat_path(), "/v1/chat/completions");
    }

    #[test]
    fn test_custom_paths_override_defaults() {
        let custom = ProviderConfig::Custom(ProviderSettings {
            models_path: Some("/healthz".into()),
            chat_path: Some("/generate".into()),
            ..ProviderSettings::default()
        });
        assert_eq!(custom.models_path(), "/healthz");
        assert_eq!(custom.chat_path(), "/generate");
    }

    #[test]
    fn test_request_headers_include_bearer_then_extras() {
        let mut settings = ProviderSettings::new("http://localhost:8000", "gpt-local");
        settings.api_key = Some("sk-local".into());
        settings.headers.insert("X-Trace".into(), "1".into());
        let headers = ProviderConfig::OpenAiCompatible(settings).request_headers();
        assert_eq!(
            headers,
            vec![
                ("Authorization".to_string(), "Bearer sk-local".to_string()),
                ("X-Trace".to_string(), "1".to_string()),
            ]
        );
    }

    #[test]
    fn test_empty_api_key_sends_no_auth() {
        let mut settings = ProviderSettings::default();
        settings.api_key = Some(String::new());
        assert!(ProviderConfig::Ollama(settings).request_headers().is_empty());
    }

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("http://localhost:11434/", "/api/tags"), "http://localhost:11434/api/tags");
        assert_eq!(join_url("http://localhost:11434", "api/chat"), "http://localhost:11434/api/chat");
    }

    #[test]
    fn test_default_endpoints() {
        assert_eq!(default_endpoint(ProviderKind::Ollama), "http://localhost:11434");
        assert_eq!(default_endpoint(ProviderKind::LmStudio), "http://localhost:1234");
    }
}
