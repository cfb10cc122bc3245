//! Configuration management for mention-bot.
//!
//! The service reads an optional JSON file at `~/.mention-bot/config.json` and
//! then applies environment variable overrides, so a plain `.env`-style
//! deployment works without any file at all.
//!
//! # Configuration Priority
//!
//! 1. Environment variables
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! ## Slack
//! - `SLACK_BOT_TOKEN` → slack.bot_token
//! - `SLACK_APP_TOKEN` → slack.app_token
//! - `SLACK_SIGNING_SECRET` → slack.signing_secret
//!
//! ## Completion API
//! - `OPENAI_API_KEY` → llm.api_key
//! - `OPENAI_API_BASE` → llm.base_url
//! - `OPENAI_API_MODEL` → llm.model
//! - `OPENAI_API_TEMPERATURE` → llm.temperature
//! - `SYSTEM_PROMPT` → llm.system_prompt
//!
//! ## History
//! - `HISTORY_REDIS_URL` → history.redis_url
//! - `HISTORY_TTL_HOURS` → history.ttl_hours
//!
//! ## Service
//! - `MENTION_BOT_PORT` → server.port
//! - `MENTION_BOT_LOG_LEVEL` → observability.log_level
//! - `MENTION_BOT_LOG_FORMAT` → observability.log_format

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".mention-bot"),
        |dirs| dirs.home_dir().join(".mention-bot"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Slack Configuration
// ============================================================================

/// Slack credentials and API endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    /// Bot token (`xoxb-...`) used for Web API calls.
    #[serde(default)]
    pub bot_token: String,

    /// App-level token (`xapp-...`) used to open Socket Mode connections.
    #[serde(default)]
    pub app_token: Option<String>,

    /// Signing secret used to verify Events API requests.
    #[serde(default)]
    pub signing_secret: Option<String>,

    /// Web API base URL.
    #[serde(default = "default_slack_api_base")]
    pub api_base: String,

    /// Web API request timeout in seconds.
    #[serde(default = "default_slack_timeout")]
    pub request_timeout_secs: u64,

    /// Delay before reconnecting a dropped Socket Mode session, in seconds.
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            app_token: None,
            signing_secret: None,
            api_base: default_slack_api_base(),
            request_timeout_secs: default_slack_timeout(),
            reconnect_delay_secs: default_reconnect_delay(),
        }
    }
}

fn default_slack_api_base() -> String {
    "https://slack.com/api".into()
}

fn default_slack_timeout() -> u64 {
    30
}

fn default_reconnect_delay() -> u64 {
    5
}

// ============================================================================
// Completion API Configuration
// ============================================================================

/// OpenAI-compatible chat completion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// API key sent as a bearer token.
    #[serde(default)]
    pub api_key: Option<String>,

    /// API base URL (without the `/chat/completions` suffix).
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    /// Model name.
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// System instruction prepended to every prompt.
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Connect timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Maximum silence between two streamed fragments, in seconds.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            temperature: default_temperature(),
            system_prompt: default_system_prompt(),
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".into()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".into()
}

fn default_temperature() -> f32 {
    0.5
}

fn default_system_prompt() -> String {
    "You are a helpful assistant answering questions in a Slack thread.".into()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_idle_timeout() -> u64 {
    60
}

// ============================================================================
// History Configuration
// ============================================================================

/// Conversation history cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Redis URL. When unset the in-process store is used.
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Key prefix for conversation lists.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Time-to-live of a conversation, in hours.
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: u64,

    /// Timeout applied to connecting and to each read or append, in seconds.
    #[serde(default = "default_history_timeout")]
    pub timeout_secs: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            key_prefix: default_key_prefix(),
            ttl_hours: default_ttl_hours(),
            timeout_secs: default_history_timeout(),
        }
    }
}

impl HistoryConfig {
    /// Conversation expiry as a duration.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_hours.saturating_mul(3600))
    }
}

fn default_key_prefix() -> String {
    "mention-bot:history:".into()
}

fn default_ttl_hours() -> u64 {
    24
}

fn default_history_timeout() -> u64 {
    5
}

// ============================================================================
// Streaming Configuration
// ============================================================================

/// Interim edit pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Initial minimum interval between interim edits, in milliseconds.
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,

    /// Footer shown under every finished answer.
    #[serde(default = "default_disclaimer")]
    pub disclaimer: String,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: default_min_interval_ms(),
            disclaimer: default_disclaimer(),
        }
    }
}

impl StreamingConfig {
    /// Initial minimum interval as a duration.
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

fn default_min_interval_ms() -> u64 {
    1000
}

fn default_disclaimer() -> String {
    "Answers are generated by a language model and may be inaccurate.".into()
}

// ============================================================================
// Server Configuration
// ============================================================================

/// HTTP adapter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address. Default is `127.0.0.1` (local only).
    #[serde(default = "default_bind_address")]
    pub bind: String,

    /// Listening port.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind_address(),
            port: default_port(),
        }
    }
}

fn default_bind_address() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    3000
}

// ============================================================================
// Observability Configuration
// ============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,

    /// Additional module targets to force to `warn`.
    #[serde(default)]
    pub excluded_targets: Vec<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            excluded_targets: Vec::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub slack: SlackConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub history: HistoryConfig,

    #[serde(default)]
    pub streaming: StreamingConfig,

    #[serde(default)]
    pub server: ServerConfig,

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

    /// Load configuration (default path or `path`) with environment overrides.
    pub fn load_with_env(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::load_from(p)?,
            None => Self::load()?,
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable lookup.
    ///
    /// Unparseable numeric values are ignored with a warning.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup("SLACK_BOT_TOKEN") {
            self.slack.bot_token = token;
        }
        if let Some(token) = lookup("SLACK_APP_TOKEN") {
            self.slack.app_token = Some(token);
        }
        if let Some(secret) = lookup("SLACK_SIGNING_SECRET") {
            self.slack.signing_secret = Some(secret);
        }

        if let Some(key) = lookup("OPENAI_API_KEY") {
            self.llm.api_key = Some(key);
        }
        if let Some(base) = lookup("OPENAI_API_BASE") {
            self.llm.base_url = base;
        }
        if let Some(model) = lookup("OPENAI_API_MODEL") {
            self.llm.model = model;
        }
        if let Some(temperature) = lookup("OPENAI_API_TEMPERATURE") {
            match temperature.trim().parse() {
                Ok(t) => self.llm.temperature = t,
                Err(_) => tracing::warn!(value = %temperature, "Ignoring invalid OPENAI_API_TEMPERATURE"),
            }
        }
        if let Some(prompt) = lookup("SYSTEM_PROMPT") {
            self.llm.system_prompt = prompt;
        }

        if let Some(url) = lookup("HISTORY_REDIS_URL") {
            self.history.redis_url = Some(url);
        }
        if let Some(hours) = lookup("HISTORY_TTL_HOURS") {
            match hours.trim().parse() {
                Ok(h) => self.history.ttl_hours = h,
                Err(_) => tracing::warn!(value = %hours, "Ignoring invalid HISTORY_TTL_HOURS"),
            }
        }

        if let Some(port) = lookup("MENTION_BOT_PORT") {
            if let Ok(p) = port.trim().parse() {
                self.server.port = p;
            }
        }
        if let Some(level) = lookup("MENTION_BOT_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Some(format) = lookup("MENTION_BOT_LOG_FORMAT") {
            self.observability.log_format = format;
        }
    }

    /// Socket address string for the HTTP adapter.
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.server.bind, self.server.port)
    }
}
