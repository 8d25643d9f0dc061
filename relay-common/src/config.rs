//! Configuration management for the relay.
//!
//! The relay reads a single configuration file at `~/.relay/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Environment variables
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `GEMINI_API_KEY` / `GOOGLE_API_KEY` → provider.api_key
//! - `RELAY_MODEL` → provider.model
//! - `ALLOWED_USER_IDS` → gateway.allowed_users (comma separated)
//! - `RELAY_HISTORY_DIR` → history.dir
//! - `RELAY_ANCHOR_CAPACITY` → history.anchor_capacity
//! - `PORT` → server.port
//! - `RELAY_LOG_LEVEL` → observability.log_level

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".relay"),
        |dirs| dirs.home_dir().join(".relay"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Messaging gateway settings
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Generative-content provider settings
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Conversation history settings
    #[serde(default)]
    pub history: HistoryConfig,

    /// Prompt settings
    #[serde(default)]
    pub prompt: PromptConfig,

    /// Health endpoint settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides, then validate.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_with(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_overrides_with(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(key) = get("GEMINI_API_KEY").or_else(|| get("GOOGLE_API_KEY")) {
            self.provider.api_key = Some(key);
        }
        if let Some(model) = get("RELAY_MODEL") {
            self.provider.model = model;
        }
        if let Some(users) = get("ALLOWED_USER_IDS") {
            self.gateway.allowed_users = users
                .split(',')
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(dir) = get("RELAY_HISTORY_DIR") {
            self.history.dir = Some(PathBuf::from(dir));
        }
        if let Some(capacity) = get("RELAY_ANCHOR_CAPACITY") {
            match capacity.parse() {
                Ok(c) => self.history.anchor_capacity = c,
                Err(_) => tracing::warn!(value = %capacity, "Ignoring invalid RELAY_ANCHOR_CAPACITY"),
            }
        }
        if let Some(port) = get("PORT") {
            if let Ok(p) = port.parse() {
                self.server.port = p;
            }
        }
        if let Some(level) = get("RELAY_LOG_LEVEL") {
            self.observability.log_level = level;
        }
    }

    /// Reject values the relay cannot run with.
    pub fn validate(&self) -> crate::Result<()> {
        if self.gateway.max_message_length == 0 {
            return Err(crate::Error::Config(
                "gateway.max_message_length must be greater than zero".into(),
            ));
        }
        if self.history.anchor_capacity == 0 {
            return Err(crate::Error::Config(
                "history.anchor_capacity must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Messaging gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Maximum characters per outbound message
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,

    /// User IDs allowed to run generation commands (`*` allows everyone)
    #[serde(default)]
    pub allowed_users: Vec<String>,

    /// Placeholder shown while a response is generated
    #[serde(default = "default_ack_text")]
    pub ack_text: String,

    /// Reply sent to users who are not on the allow-list
    #[serde(default = "default_denied_text")]
    pub denied_text: String,
}

fn default_max_message_length() -> usize {
    2000
}

fn default_ack_text() -> String {
    "Thinking...".into()
}

fn default_denied_text() -> String {
    "You are not allowed to use this bot. Ask the bot owner to add you to the allow-list.".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_message_length: default_max_message_length(),
            allowed_users: Vec::new(),
            ack_text: default_ack_text(),
            denied_text: default_denied_text(),
        }
    }
}

/// Generative-content provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// API key (falls back to GEMINI_API_KEY / GOOGLE_API_KEY)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Text model
    #[serde(default = "default_model")]
    pub model: String,

    /// Image-capable model
    #[serde(default = "default_image_model")]
    pub image_model: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Whether the service accepts a dedicated system role.
    ///
    /// When false, the system prompt is sent as a leading user turn.
    #[serde(default = "default_true")]
    pub system_role_supported: bool,
}

fn default_model() -> String {
    "gemini-2.0-flash-lite".into()
}

fn default_image_model() -> String {
    "gemini-2.0-flash-preview-image-generation".into()
}

fn default_temperature() -> f64 {
    0.7
}

fn default_true() -> bool {
    true
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            image_model: default_image_model(),
            temperature: default_temperature(),
            system_role_supported: true,
        }
    }
}

/// Conversation history configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Directory holding named history records (default: `~/.relay/histories`)
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// Maximum number of reply anchors kept in memory
    #[serde(default = "default_anchor_capacity")]
    pub anchor_capacity: usize,
}

fn default_anchor_capacity() -> usize {
    10_000
}

impl HistoryConfig {
    /// Resolved history directory.
    pub fn dir(&self) -> PathBuf {
        self.dir
            .clone()
            .unwrap_or_else(|| config_dir().join("histories"))
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            dir: None,
            anchor_capacity: default_anchor_capacity(),
        }
    }
}

/// Prompt configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    /// System prompt sent once at the start of every conversation
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

fn default_system_prompt() -> String {
    "You are a helpful assistant in a chat server. Reply as briefly and helpfully as you can, \
     and explain your answer."
        .into()
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
        }
    }
}

/// Health endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    3000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}
