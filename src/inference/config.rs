//! Backend configuration: types, validation, and loading.
//!
//! A `BackendConfig` is built once at startup from a flat key/value map, the
//! process environment, or `localchat.yaml`, and validated before any network
//! activity. It is never mutated afterwards; the `with_*` builders return a new
//! instance that must be validated again.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::InferenceError;

// ─── Defaults & Limits ───────────────────────────────────────────────────────

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 2048;
pub const DEFAULT_CONTEXT_SIZE: u32 = 4096;

const TIMEOUT_MS_RANGE: (u64, u64) = (1_000, 600_000);
const TEMPERATURE_RANGE: (f32, f32) = (0.0, 2.0);
const MAX_TOKENS_RANGE: (u32, u32) = (1, 100_000);
const CONTEXT_SIZE_RANGE: (u32, u32) = (512, 32_768);

/// Prefix for configuration environment variables (`LOCALCHAT_TIMEOUT_MS`, ...).
const ENV_PREFIX: &str = "LOCALCHAT_";

/// File name searched for by [`find_config_path`].
const CONFIG_FILE_NAME: &str = "localchat.yaml";

// ─── Public Types ────────────────────────────────────────────────────────────

/// Which kind of backend is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Ollama,
    LmStudio,
    LocalAiServer,
    OpenAiCompatible,
    Custom,
}

impl ProviderKind {
    /// Human-readable name, used as the prefix of validation messages.
    pub fn display_name(self) -> &'static str {
        match self {
            ProviderKind::Ollama => "Ollama",
            ProviderKind::LmStudio => "LM Studio",
            ProviderKind::LocalAiServer => "LocalAI server",
            ProviderKind::OpenAiCompatible => "OpenAI-compatible",
            ProviderKind::Custom => "Custom provider",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .to_ascii_lowercase()
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .collect();
        match normalized.as_str() {
            "ollama" => Ok(ProviderKind::Ollama),
            "lmstudio" => Ok(ProviderKind::LmStudio),
            "localai" | "localaiserver" => Ok(ProviderKind::LocalAiServer),
            "openai" | "openaicompatible" => Ok(ProviderKind::OpenAiCompatible),
            "custom" => Ok(ProviderKind::Custom),
            _ => Err(format!("unknown provider kind '{s}'")),
        }
    }
}

/// Provider-specific connection settings.
///
/// `url` and `model` are optional at the type level so that loaders can
/// hand an incomplete config to [`validate`], which reports what is missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Overrides the provider's model-listing path (e.g. `/api/tags`).
    #[serde(default)]
    pub models_path: Option<String>,
    /// Overrides the provider's chat path (e.g. `/api/chat`).
    #[serde(default)]
    pub chat_path: Option<String>,
}

impl ProviderSettings {
    pub fn new(url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            model: Some(model.into()),
            ..Self::default()
        }
    }
}

/// The selected provider with its settings. The variant is the provider
/// kind, so exactly one settings block exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderConfig {
    Ollama(ProviderSettings),
    LmStudio(ProviderSettings),
    LocalAiServer(ProviderSettings),
    OpenAiCompatible(ProviderSettings),
    Custom(ProviderSettings),
}

impl ProviderConfig {
    pub fn new(kind: ProviderKind, settings: ProviderSettings) -> Self {
        match kind {
            ProviderKind::Ollama => ProviderConfig::Ollama(settings),
            ProviderKind::LmStudio => ProviderConfig::LmStudio(settings),
            ProviderKind::LocalAiServer => ProviderConfig::LocalAiServer(settings),
            ProviderKind::OpenAiCompatible => ProviderConfig::OpenAiCompatible(settings),
            ProviderKind::Custom => ProviderConfig::Custom(settings),
        }
    }

    pub fn kind(&self) -> ProviderKind {
        match self {
            ProviderConfig::Ollama(_) => ProviderKind::Ollama,
            ProviderConfig::LmStudio(_) => ProviderKind::LmStudio,
            ProviderConfig::LocalAiServer(_) => ProviderKind::LocalAiServer,
            ProviderConfig::OpenAiCompatible(_) => ProviderKind::OpenAiCompatible,
            ProviderConfig::Custom(_) => ProviderKind::Custom,
        }
    }

    pub fn settings(&self) -> &ProviderSettings {
        match self {
            ProviderConfig::Ollama(s)
            | ProviderConfig::LmStudio(s)
            | ProviderConfig::LocalAiServer(s)
            | ProviderConfig::OpenAiCompatible(s)
            | ProviderConfig::Custom(s) => s,
        }
    }
}

/// Backend configuration (mirrors `localchat.yaml`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub provider: ProviderConfig,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Extended schema: only validated when supplied.
    #[serde(default)]
    pub context_size: Option<u32>,
    #[serde(default)]
    pub thread_count: Option<u32>,
    #[serde(default)]
    pub gpu_enabled: Option<bool>,
    /// Stream responses (NDJSON) instead of issuing single-shot requests.
    #[serde(default = "default_stream")]
    pub stream: bool,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}
fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}
fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}
fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}
fn default_stream() -> bool {
    true
}

impl BackendConfig {
    /// A config for `provider` with every tunable at its documented default.
    pub fn new(provider: ProviderConfig) -> Self {
        Self {
            provider,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            context_size: Some(DEFAULT_CONTEXT_SIZE),
            thread_count: None,
            gpu_enabled: None,
            stream: true,
        }
    }

    pub fn provider_kind(&self) -> ProviderKind {
        self.provider.kind()
    }

    /// Base URL of the backend, or `""` when unset.
    pub fn endpoint(&self) -> &str {
        self.provider.settings().url.as_deref().unwrap_or("").trim_end_matches('/')
    }

    /// Model identifier sent with every chat request, or `""` when unset.
    pub fn model_id(&self) -> &str {
        self.provider.settings().model.as_deref().unwrap_or("")
    }

    pub fn with_temperature(&self, temperature: f32) -> Self {
        Self {
            temperature,
            ..self.clone()
        }
    }

    pub fn with_max_tokens(&self, max_tokens: u32) -> Self {
        Self {
            max_tokens,
            ..self.clone()
        }
    }

    pub fn with_stream(&self, stream: bool) -> Self {
        Self {
            stream,
            ..self.clone()
        }
    }

    /// Validate and convert the report into a `Result`.
    pub fn validated(self) -> Result<Self, InferenceError> {
        let report = validate(&self);
        if report.valid {
            Ok(self)
        } else {
            Err(InferenceError::ConfigurationError {
                errors: report.errors,
            })
        }
    }

    /// Build a config from a flat key/value map.
    ///
    /// Recognised keys: `providerKind`, `endpoint`, `modelId`, `apiKey`,
    /// `timeoutMs`, `maxRetries`, `temperature`, `maxTokens`, `contextSize`,
    /// `threadCount`, `gpuEnabled`, `stream`. Absent tunables take their
    /// defaults. Values that fail to parse are collected into a single
    /// `ConfigurationError`. A missing endpoint or model is left empty for
    /// [`validate`] to report.
    pub fn from_key_values(values: &HashMap<String, String>) -> Result<Self, InferenceError> {
        let mut errors = Vec::new();
        let get = |key: &str| values.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());

        let kind = match get("providerKind") {
            Some(raw) => raw.parse::<ProviderKind>().unwrap_or_else(|e| {
                errors.push(e);
                ProviderKind::Ollama
            }),
            None => ProviderKind::Ollama,
        };

        let settings = ProviderSettings {
            url: get("endpoint").map(str::to_string),
            model: get("modelId").map(str::to_string),
            api_key: get("apiKey").map(str::to_string),
            ..ProviderSettings::default()
        };

        let mut config = BackendConfig::new(ProviderConfig::new(kind, settings));
        config.timeout_ms = parse_field(get("timeoutMs"), "timeoutMs", &mut errors)
            .unwrap_or(DEFAULT_TIMEOUT_MS);
        config.max_retries = parse_field(get("maxRetries"), "maxRetries", &mut errors)
            .unwrap_or(DEFAULT_MAX_RETRIES);
        config.temperature = parse_field(get("temperature"), "temperature", &mut errors)
            .unwrap_or(DEFAULT_TEMPERATURE);
        config.max_tokens = parse_field(get("maxTokens"), "maxTokens", &mut errors)
            .unwrap_or(DEFAULT_MAX_TOKENS);
        config.context_size = Some(
            parse_field(get("contextSize"), "contextSize", &mut errors)
                .unwrap_or(DEFAULT_CONTEXT_SIZE),
        );
        config.thread_count = parse_field(get("threadCount"), "threadCount", &mut errors);
        config.gpu_enabled = parse_field(get("gpuEnabled"), "gpuEnabled", &mut errors);
        config.stream = parse_field(get("stream"), "stream", &mut errors).unwrap_or(true);

        if errors.is_empty() {
            Ok(config)
        } else {
            Err(InferenceError::ConfigurationError { errors })
        }
    }

    /// Build a config from `LOCALCHAT_*` environment variables.
    ///
    /// `LOCALCHAT_PROVIDER_KIND` maps to `providerKind`,
    /// `LOCALCHAT_TIMEOUT_MS` to `timeoutMs`, and so on.
    pub fn from_env() -> Result<Self, InferenceError> {
        const KEYS: [&str; 12] = [
            "providerKind",
            "endpoint",
            "modelId",
            "apiKey",
            "timeoutMs",
            "maxRetries",
            "temperature",
            "maxTokens",
            "contextSize",
            "threadCount",
            "gpuEnabled",
            "stream",
        ];

        let values: HashMap<String, String> = KEYS
            .iter()
            .filter_map(|key| {
                std::env::var(env_var_name(key))
                    .ok()
                    .map(|v| (key.to_string(), v))
            })
            .collect();

        Self::from_key_values(&values)
    }
}

/// `timeoutMs` → `LOCALCHAT_TIMEOUT_MS`.
fn env_var_name(key: &str) -> String {
    let mut name = String::from(ENV_PREFIX);
    for ch in key.chars() {
        if ch.is_ascii_uppercase() {
            name.push('_');
        }
        name.push(ch.to_ascii_uppercase());
    }
    name
}

fn parse_field<T: FromStr>(raw: Option<&str>, key: &str, errors: &mut Vec<String>) -> Option<T> {
    let raw = raw?;
    match raw.parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            errors.push(format!("{key} has an invalid value '{raw}'"));
            None
        }
    }
}

// ─── Validation ──────────────────────────────────────────────────────────────

/// Outcome of [`validate`]. `valid` is `errors.is_empty()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// Validate a backend configuration. Pure; reports every violated rule in
/// a fixed order rather than stopping at the first.
pub fn validate(config: &BackendConfig) -> ValidationReport {
    let mut errors = Vec::new();
    let provider = config.provider_kind().display_name();
    let settings = config.provider.settings();

    match non_blank(&settings.url) {
        None => errors.push(format!("{provider} URL is required")),
        Some(url) if !(url.starts_with("http://") || url.starts_with("https://")) => {
            errors.push(format!("{provider} URL must start with http:// or https://"))
        }
        Some(_) => {}
    }
    if non_blank(&settings.model).is_none() {
        errors.push(format!("{provider} model is required"));
    }

    let (lo, hi) = TIMEOUT_MS_RANGE;
    if !(lo..=hi).contains(&config.timeout_ms) {
        errors.push(format!("timeoutMs must be between {lo} and {hi}"));
    }

    let (lo, hi) = TEMPERATURE_RANGE;
    // NaN fails `contains`, so it is reported too.
    if !(lo..=hi).contains(&config.temperature) {
        errors.push(format!("temperature must be between {lo} and {hi}"));
    }

    let (lo, hi) = MAX_TOKENS_RANGE;
    if !(lo..=hi).contains(&config.max_tokens) {
        errors.push(format!("maxTokens must be between {lo} and {hi}"));
    }

    if let Some(context_size) = config.context_size {
        let (lo, hi) = CONTEXT_SIZE_RANGE;
        if !(lo..=hi).contains(&context_size) {
            errors.push(format!("contextSize must be between {lo} and {hi}"));
        }
    }

    if let Some(threads) = config.thread_count {
        if threads < 1 {
            errors.push("threadCount must be at least 1".to_string());
        }
    }

    ValidationReport {
        valid: errors.is_empty(),
        errors,
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Resolve the config file path.
///
/// Uses `LOCALCHAT_CONFIG` if it points at an existing file, otherwise
/// searches upward from `start` for `localchat.yaml`.
pub fn find_config_path(start: &Path) -> Result<PathBuf, InferenceError> {
    if let Ok(path) = std::env::var("LOCALCHAT_CONFIG") {
        let candidate = PathBuf::from(path);
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.exists() {
            return Ok(candidate);
        }
        if !dir.pop() {
            break;
        }
    }

    Err(InferenceError::ConfigurationError {
        errors: vec![format!("could not find {CONFIG_FILE_NAME}")],
    })
}

/// Load, interpolate, parse, and validate a YAML backend configuration.
///
/// String values may reference `${VAR_NAME}` or `${VAR_NAME:-default}`.
pub fn load_backend_config(path: &Path) -> Result<BackendConfig, InferenceError> {
    let raw = std::fs::read_to_string(path).map_err(|e| InferenceError::ConfigurationError {
        errors: vec![format!("failed to read {}: {e}", path.display())],
    })?;

    let interpolated = interpolate_env_vars(&raw);

    let config: BackendConfig =
        serde_yaml::from_str(&interpolated).map_err(|e| InferenceError::ConfigurationError {
            errors: vec![format!("failed to parse config: {e}")],
        })?;

    tracing::debug!(
        path = %path.display(),
        provider = %config.provider_kind(),
        model = config.model_id(),
        "loaded backend config"
    );

    config.validated()
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

fn resolve_var_expr(expr: &str) -> String {
    if let Some(idx) = expr.find(":-") {
        let var_name = &expr[..idx];
        let default = &expr[idx + 2..];
        std::env::var(var_name).unwrap_or_else(|_| expand_tilde(default))
    } else {
        std::env::var(expr).unwrap_or_default()
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
