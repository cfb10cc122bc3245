//! Configuration validation.
//!
//! Checks that credentials required by the selected entry point are present
//! and that numeric settings are within usable ranges.

use thiserror::Error;

use crate::config::{Config, HistoryConfig, LlmConfig, SlackConfig, StreamingConfig};

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

/// Which process entry point the configuration will drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryMode {
    /// Persistent Socket Mode connection.
    Socket,
    /// Request-driven Events API handler.
    Http,
}

impl Config {
    /// Validate the entire configuration for the given entry point.
    pub fn validate(&self, mode: EntryMode) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = self.slack.validate() {
            errors.push(e);
        }
        if mode == EntryMode::Socket
            && self.slack.app_token.as_deref().map_or(true, str::is_empty)
        {
            errors.push(ValidationError::MissingField {
                field: "slack.app_token".into(),
            });
        }
        if let Err(e) = self.llm.validate() {
            errors.push(e);
        }
        if let Err(e) = self.history.validate() {
            errors.push(e);
        }
        if let Err(e) = self.streaming.validate() {
            errors.push(e);
        }

        if errors.is_empty() {
            Ok(())
        } else if errors.len() == 1 {
            Err(errors.remove(0))
        } else {
            Err(ValidationError::Multiple(errors))
        }
    }
}

impl Validate for SlackConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.bot_token.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "slack.bot_token".into(),
            });
        }
        Ok(())
    }
}

impl Validate for LlmConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.model.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "llm.model".into(),
            });
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ValidationError::InvalidValue {
                field: "llm.temperature".into(),
                reason: format!("{} is outside 0.0..=2.0", self.temperature),
            });
        }
        if self.idle_timeout_secs == 0 {
            return Err(ValidationError::InvalidValue {
                field: "llm.idle_timeout_secs".into(),
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }
}

/// Longest accepted conversation TTL: one year.
const MAX_TTL_HOURS: u64 = 24 * 365;

impl Validate for HistoryConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.ttl_hours == 0 {
            return Err(ValidationError::InvalidValue {
                field: "history.ttl_hours".into(),
                reason: "must be greater than zero".into(),
            });
        }
        if self.ttl_hours > MAX_TTL_HOURS {
            return Err(ValidationError::InvalidValue {
                field: "history.ttl_hours".into(),
                reason: format!("must be at most {MAX_TTL_HOURS}"),
            });
        }
        Ok(())
    }
}

impl Validate for StreamingConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.min_interval_ms == 0 {
            return Err(ValidationError::InvalidValue {
                field: "streaming.min_interval_ms".into(),
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }
}
