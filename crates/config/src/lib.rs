//! Configuration loading, validation, and management for chatrelay.
//!
//! Loads configuration from `~/.chatrelay/config.toml` with environment
//! variable overrides. Validates numeric settings at startup; malformed
//! optional values (profile JSON, stop sequences) are logged and ignored.

use chatrelay_core::GenerationParams;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.chatrelay/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server-wide kill switch; `false` rejects every chat as disabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Profile used when a request names none (or an unknown one)
    #[serde(default)]
    pub default_profile: String,

    /// Single persona used when no profile resolves
    #[serde(default)]
    pub fallback_system: String,

    /// Replies longer than this many characters are clipped
    #[serde(default = "default_max_reply_chars")]
    pub max_reply_chars: usize,

    /// Answer with a local echo instead of an upstream failure
    #[serde(default)]
    pub fallback_echo: bool,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub memory: MemoryConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Raw persona configurations, keyed by profile name.
    ///
    /// Each value is either a string or a table; normalization (and skipping
    /// of malformed entries) happens in the profile resolver.
    #[serde(default)]
    pub profiles: BTreeMap<String, serde_json::Value>,
}

fn default_true() -> bool {
    true
}
fn default_max_reply_chars() -> usize {
    900
}

/// Redact a secret string for Debug output.
fn redact(s: &str) -> &'static str {
    if s.is_empty() { "None" } else { "[REDACTED]" }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("enabled", &self.enabled)
            .field("default_profile", &self.default_profile)
            .field("fallback_system_set", &!self.fallback_system.is_empty())
            .field("max_reply_chars", &self.max_reply_chars)
            .field("fallback_echo", &self.fallback_echo)
            .field("auth", &self.auth)
            .field("upstream", &self.upstream)
            .field("generation", &self.generation)
            .field("memory", &self.memory)
            .field("gateway", &self.gateway)
            .field("profiles", &self.profiles.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Shared token callers must present. Empty disables the check.
    #[serde(default = "default_auth_token")]
    pub token: String,

    /// Session ids allowed to chat. Empty allows every session.
    #[serde(default)]
    pub allowlist: Vec<String>,
}

fn default_auth_token() -> String {
    "change-me".into()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token: default_auth_token(),
            allowlist: vec![],
        }
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("token", &redact(&self.token))
            .field("allowlist", &self.allowlist)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the OpenAI-compatible endpoint
    #[serde(default)]
    pub api_url: String,

    /// Path appended to `api_url`
    #[serde(default = "default_chat_path")]
    pub chat_path: String,

    #[serde(default)]
    pub api_key: String,

    #[serde(default)]
    pub model: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_chat_path() -> String {
    "/v1/chat/completions".into()
}
fn default_timeout_secs() -> u64 {
    25
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            chat_path: default_chat_path(),
            api_key: String::new(),
            model: String::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl UpstreamConfig {
    /// Full chat completions URL, or `None` when no base URL is configured.
    pub fn chat_url(&self) -> Option<String> {
        if self.api_url.trim().is_empty() {
            return None;
        }
        Some(format!("{}{}", self.api_url.trim_end_matches('/'), self.chat_path))
    }

    /// Whether both an endpoint and a key are configured.
    pub fn is_ready(&self) -> bool {
        !self.api_url.trim().is_empty() && !self.api_key.is_empty()
    }
}

impl std::fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("api_url", &self.api_url)
            .field("chat_path", &self.chat_path)
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Server-wide generation defaults. Profiles may override a subset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default)]
    pub frequency_penalty: f32,

    #[serde(default)]
    pub presence_penalty: f32,

    #[serde(default = "default_repetition_penalty")]
    pub repetition_penalty: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    #[serde(default)]
    pub top_k: u32,

    #[serde(default)]
    pub min_tokens: u32,

    #[serde(default)]
    pub stop: Vec<String>,
}

fn default_max_tokens() -> u32 {
    220
}
fn default_temperature() -> f32 {
    1.0
}
fn default_repetition_penalty() -> f32 {
    1.0
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            repetition_penalty: default_repetition_penalty(),
            top_p: None,
            top_k: 0,
            min_tokens: 0,
            stop: vec![],
        }
    }
}

impl GenerationConfig {
    /// The defaults as completion parameters for the given model.
    pub fn to_params(&self, model: &str) -> GenerationParams {
        GenerationParams {
            model: model.to_string(),
            temperature: self.temperature,
            frequency_penalty: self.frequency_penalty,
            presence_penalty: self.presence_penalty,
            repetition_penalty: self.repetition_penalty,
            max_tokens: self.max_tokens,
            top_p: self.top_p,
            top_k: self.top_k,
            min_tokens: self.min_tokens,
            stop: self.stop.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Default conversational exchanges kept per session (2N turns)
    #[serde(default = "default_memory_turns")]
    pub turns: usize,

    /// Character budget for history included in a prompt
    #[serde(default = "default_memory_max_chars")]
    pub max_chars: usize,

    /// Write history and sticky facts through to SQLite
    #[serde(default)]
    pub persist: bool,

    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Maximum distinct sticky keys per session; 0 = unbounded
    #[serde(default)]
    pub max_sticky_keys: usize,
}

fn default_memory_turns() -> usize {
    8
}
fn default_memory_max_chars() -> usize {
    3500
}
fn default_db_path() -> String {
    "./memory.sqlite".into()
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            turns: default_memory_turns(),
            max_chars: default_memory_max_chars(),
            persist: false,
            db_path: default_db_path(),
            max_sticky_keys: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Minimum interval between two chat calls from the same client
    #[serde(default = "default_rate_limit_window_ms")]
    pub rate_limit_window_ms: u64,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8000
}
fn default_rate_limit_window_ms() -> u64 {
    2500
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            rate_limit_window_ms: default_rate_limit_window_ms(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.chatrelay/config.toml),
    /// then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply `CHATRELAY_*` overrides from the given variable lookup.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(token) = lookup("CHATRELAY_AUTH_TOKEN") {
            self.auth.token = token;
        }
        if let Some(key) = lookup("CHATRELAY_API_KEY") {
            self.upstream.api_key = key;
        }
        if let Some(url) = lookup("CHATRELAY_API_URL") {
            self.upstream.api_url = url;
        }
        if let Some(model) = lookup("CHATRELAY_MODEL") {
            self.upstream.model = model;
        }
        if let Some(profile) = lookup("CHATRELAY_DEFAULT_PROFILE") {
            self.default_profile = profile.trim().to_string();
        }
        if let Some(system) = lookup("CHATRELAY_SYSTEM") {
            self.fallback_system = system;
        }
        if let Some(raw) = lookup("CHATRELAY_PROFILES_JSON") {
            self.merge_profiles_json(&raw);
        }
        if let Some(raw) = lookup("CHATRELAY_STOP") {
            if let Some(stop) = parse_stop_sequences(&raw) {
                self.generation.stop = stop;
            }
        }
        if let Some(flag) = lookup("CHATRELAY_PERSIST") {
            self.memory.persist = parse_flag(&flag);
        }
        if let Some(path) = lookup("CHATRELAY_DB_PATH") {
            self.memory.db_path = path;
        }
        if let Some(port) = lookup("CHATRELAY_PORT") {
            match port.trim().parse() {
                Ok(p) => self.gateway.port = p,
                Err(_) => tracing::warn!(value = %port, "Ignoring malformed CHATRELAY_PORT"),
            }
        }
    }

    /// Merge a JSON object of profiles over the configured ones.
    fn merge_profiles_json(&mut self, raw: &str) {
        if raw.trim().is_empty() {
            return;
        }
        match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(serde_json::Value::Object(map)) => {
                for (key, value) in map {
                    self.profiles.insert(key, value);
                }
            }
            Ok(_) => tracing::warn!("CHATRELAY_PROFILES_JSON is not a JSON object; ignoring it"),
            Err(e) => tracing::warn!(error = %e, "Malformed CHATRELAY_PROFILES_JSON; ignoring it"),
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".chatrelay")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.generation.temperature) {
            return Err(ConfigError::ValidationError(
                "generation.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.memory.turns == 0 {
            return Err(ConfigError::ValidationError(
                "memory.turns must be at least 1".into(),
            ));
        }

        if self.upstream.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "upstream.timeout_secs must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Server-wide generation parameters before profile overrides.
    pub fn generation_defaults(&self) -> GenerationParams {
        self.generation.to_params(&self.upstream.model)
    }

    /// Generate a default config TOML string (for the `config` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_profile: String::new(),
            fallback_system: String::new(),
            max_reply_chars: default_max_reply_chars(),
            fallback_echo: false,
            auth: AuthConfig::default(),
            upstream: UpstreamConfig::default(),
            generation: GenerationConfig::default(),
            memory: MemoryConfig::default(),
            gateway: GatewayConfig::default(),
            profiles: BTreeMap::new(),
        }
    }
}

/// Interpret an on/off environment flag (`1`, `true`, `yes`, `on`).
pub fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Parse a JSON array of stop sequences.
///
/// Anything other than an array of strings is logged and treated as absent.
pub fn parse_stop_sequences(raw: &str) -> Option<Vec<String>> {
    if raw.trim().is_empty() {
        return None;
    }
    match serde_json::from_str::<Vec<String>>(raw) {
        Ok(stop) => Some(stop),
        Err(e) => {
            tracing::warn!(error = %e, "Malformed stop sequence list; ignoring it");
            None
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
