//! mention-common - Shared configuration, logging, errors and conversation
//! history for mention-bot.
//!
//! This crate provides:
//! - Configuration types, loading and environment overrides
//! - Configuration validation
//! - Logging setup
//! - Conversation turns and the history store (in-memory and Redis)

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod history;
pub mod logging;
pub mod validation;

pub use config::{
    Config, HistoryConfig, LlmConfig, ObservabilityConfig, ServerConfig, SlackConfig,
    StreamingConfig,
};
pub use history::{
    create_history_store, ConversationTurn, HistoryError, HistoryResult, HistoryStore,
    InMemoryHistory, Role,
};
pub use validation::{EntryMode, Validate, ValidationError};
