//! Traits at the Slack boundary.

use crate::message::MessageTarget;
use async_trait::async_trait;

/// Suffix shown under in-progress text while the answer is still streaming.
pub const TYPING_SUFFIX: &str = "\n\nTyping...";

/// Result type for channel operations.
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Channel error type.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Rate limited: retry after {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },

    #[error("Message send failed: {0}")]
    SendFailed(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Destination of a streamed answer.
///
/// One placeholder is posted per mention; every later call edits that same
/// message. Callers issue edits for one target sequentially.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Post the `Typing...` placeholder into the thread.
    async fn post_placeholder(
        &self,
        channel: &str,
        thread_ts: &str,
    ) -> ChannelResult<MessageTarget>;

    /// Replace the message with partial text followed by the typing suffix.
    async fn emit_interim(&self, target: &MessageTarget, text: &str) -> ChannelResult<()>;

    /// Replace the message with the finished answer and its footer.
    async fn emit_final(&self, target: &MessageTarget, text: &str) -> ChannelResult<()>;
}

/// Text of an interim edit.
pub fn interim_text(text: &str) -> String {
    format!("{text}{TYPING_SUFFIX}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interim_text_appends_suffix() {
        assert_eq!(interim_text("Hel"), "Hel\n\nTyping...");
        assert_eq!(interim_text(""), TYPING_SUFFIX);
    }

    #[test]
    fn rate_limited_display() {
        let err = ChannelError::RateLimited { retry_after_secs: 3 };
        assert_eq!(err.to_string(), "Rate limited: retry after 3 seconds");
    }
}
