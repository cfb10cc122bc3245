//! Failure taxonomy of one handled mention.

use crate::llm::CompletionError;
use crate::traits::ChannelError;
use mention_common::history::HistoryError;
use std::time::Duration;

/// Errors raised while handling a mention.
///
/// Only `PlaceholderSend`, `Completion`, `FinalEdit` and a completion
/// `Timeout` abort a turn. The others are logged where they happen and the
/// turn carries on.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Failed to post placeholder: {0}")]
    PlaceholderSend(#[source] ChannelError),

    #[error("Interim edit failed: {0}")]
    InterimEdit(#[source] ChannelError),

    #[error("Final edit failed: {0}")]
    FinalEdit(#[source] ChannelError),

    #[error("History read failed: {0}")]
    HistoryRead(#[source] HistoryError),

    #[error("History write failed: {0}")]
    HistoryWrite(#[source] HistoryError),

    #[error("Completion failed: {0}")]
    Completion(#[source] CompletionError),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

impl BridgeError {
    /// Short machine-readable name for logs.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::PlaceholderSend(_) => "placeholder_send",
            Self::InterimEdit(_) => "interim_edit",
            Self::FinalEdit(_) => "final_edit",
            Self::HistoryRead(_) => "history_read",
            Self::HistoryWrite(_) => "history_write",
            Self::Completion(_) => "completion",
            Self::Timeout { .. } => "timeout",
        }
    }
}

impl From<CompletionError> for BridgeError {
    fn from(e: CompletionError) -> Self {
        match e {
            CompletionError::IdleTimeout(after) => Self::Timeout {
                operation: "completion stream",
                after,
            },
            other => Self::Completion(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_timeout_becomes_timeout() {
        let err = BridgeError::from(CompletionError::IdleTimeout(Duration::from_secs(60)));
        assert_eq!(err.kind(), "timeout");
        assert_eq!(err.to_string(), "completion stream timed out after 60s");
    }

    #[test]
    fn other_completion_errors_keep_their_source() {
        let err = BridgeError::from(CompletionError::Api("overloaded".into()));
        assert_eq!(err.kind(), "completion");
        assert!(std::error::Error::source(&err).is_some());
    }
}
