//! Configuration loading, validation, and management for marginalia.
//!
//! Loads configuration from `~/.marginalia/config.toml` with environment
//! variable overrides. Validates all settings at load time.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.marginalia/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the upstream LLM endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Which upstream to talk to ("openrouter", "openai", "anthropic", ...)
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Override for the provider's base URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Model identifier sent upstream
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens the model may generate per answer
    #[serde(default = "default_max_response_tokens")]
    pub max_response_tokens: u32,

    /// Context window budget
    #[serde(default)]
    pub context: ContextConfig,

    /// Streaming transport settings
    #[serde(default)]
    pub stream: StreamConfig,
}

fn default_provider() -> String {
    "openrouter".into()
}
fn default_model() -> String {
    "openai/gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_response_tokens() -> u32 {
    1024
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_response_tokens", &self.max_response_tokens)
            .field("context", &self.context)
            .field("stream", &self.stream)
            .finish()
    }
}

/// Token budget for the conversation context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Size of the whole context window, in estimated tokens
    #[serde(default = "default_context_max_tokens")]
    pub max_tokens: usize,

    /// Tokens held back for the model's answer
    #[serde(default = "default_reserve_buffer")]
    pub reserve_buffer: usize,
}

fn default_context_max_tokens() -> usize {
    4000
}
fn default_reserve_buffer() -> usize {
    800
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_context_max_tokens(),
            reserve_buffer: default_reserve_buffer(),
        }
    }
}

impl ContextConfig {
    /// `max_tokens - reserve_buffer`.
    pub fn target_tokens(&self) -> usize {
        self.max_tokens.saturating_sub(self.reserve_buffer)
    }
}

/// Streaming transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Timeout for sessions routed through the channel bridge
    #[serde(default = "default_bridge_timeout_secs")]
    pub bridge_timeout_secs: u64,

    /// Timeout for sessions that fetch directly from the provider
    #[serde(default = "default_direct_timeout_secs")]
    pub direct_timeout_secs: u64,

    /// Buffered messages per stream channel
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_bridge_timeout_secs() -> u64 {
    30
}
fn default_direct_timeout_secs() -> u64 {
    120
}
fn default_channel_capacity() -> usize {
    64
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            bridge_timeout_secs: default_bridge_timeout_secs(),
            direct_timeout_secs: default_direct_timeout_secs(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl StreamConfig {
    pub fn bridge_timeout(&self) -> Duration {
        Duration::from_secs(self.bridge_timeout_secs)
    }

    pub fn direct_timeout(&self) -> Duration {
        Duration::from_secs(self.direct_timeout_secs)
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.marginalia/config.toml).
    ///
    /// Also checks environment variables:
    /// - `MARGINALIA_API_KEY` (highest priority), then `OPENROUTER_API_KEY`,
    ///   `OPENAI_API_KEY`, `ANTHROPIC_API_KEY`
    /// - `MARGINALIA_PROVIDER`, `MARGINALIA_MODEL`
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

    /// Apply environment overrides using the given lookup.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if self.api_key.is_none() {
            self.api_key = [
                "MARGINALIA_API_KEY",
                "OPENROUTER_API_KEY",
                "OPENAI_API_KEY",
                "ANTHROPIC_API_KEY",
            ]
            .iter()
            .find_map(|key| var(key).filter(|v| !v.is_empty()));
        }

        if let Some(provider) = var("MARGINALIA_PROVIDER") {
            self.provider = provider;
        }

        if let Some(model) = var("MARGINALIA_MODEL") {
            self.model = model;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".marginalia")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.context.reserve_buffer >= self.context.max_tokens {
            return Err(ConfigError::ValidationError(
                "context.reserve_buffer must be smaller than context.max_tokens".into(),
            ));
        }

        if self.stream.bridge_timeout_secs == 0 || self.stream.direct_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "stream timeouts must be greater than zero".into(),
            ));
        }

        if self.stream.channel_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "stream.channel_capacity must be greater than zero".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            provider: default_provider(),
            base_url: None,
            model: default_model(),
            temperature: default_temperature(),
            max_response_tokens: default_max_response_tokens(),
            context: ContextConfig::default(),
            stream: StreamConfig::default(),
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
