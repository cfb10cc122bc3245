//! Message types for mention handling.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::LazyLock;

/// Matches user mention tokens such as `<@U012ABC>` or `<@U012ABC|name>`.
static MENTION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<@.*?>").expect("valid mention regex"));

/// An `app_mention` event as delivered by Slack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MentionEvent {
    /// Timestamp of the mentioning message.
    pub ts: String,
    /// Channel the mention was posted in.
    pub channel: String,
    /// Raw message text including mention tokens.
    #[serde(default)]
    pub text: String,
    /// Root timestamp of the thread, when the mention is a thread reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<String>,
    /// Author of the mention.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Events API event id, when delivered over HTTP or Socket Mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

impl MentionEvent {
    /// Create a top-level mention.
    pub fn new(channel: impl Into<String>, ts: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            ts: ts.into(),
            channel: channel.into(),
            text: text.into(),
            thread_ts: None,
            user: None,
            event_id: None,
        }
    }

    /// Mark the mention as a reply inside a thread.
    pub fn in_thread(mut self, thread_ts: impl Into<String>) -> Self {
        self.thread_ts = Some(thread_ts.into());
        self
    }

    /// Identity of the conversation this mention belongs to.
    ///
    /// A mention inside a thread belongs to the thread root; a top-level
    /// mention starts a new conversation rooted at itself.
    pub fn conversation_id(&self) -> &str {
        self.thread_ts.as_deref().unwrap_or(&self.ts)
    }

    /// Message text with every mention token removed.
    pub fn prompt_text(&self) -> String {
        normalize_mention_text(&self.text)
    }
}

/// Strip every `<@...>` token and surrounding whitespace.
pub fn normalize_mention_text(text: &str) -> String {
    MENTION_PATTERN.replace_all(text, "").trim().to_string()
}

/// Body of an Events API request (also the `payload` of a Socket Mode
/// `events_api` envelope).
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventsApiPayload {
    UrlVerification {
        challenge: String,
    },
    EventCallback {
        #[serde(default)]
        event_id: Option<String>,
        event: Value,
    },
    #[serde(other)]
    Other,
}

impl EventsApiPayload {
    /// Extract the mention carried by an `event_callback`, if any.
    pub fn into_mention(self) -> Option<MentionEvent> {
        let Self::EventCallback { event_id, event } = self else {
            return None;
        };
        if event.get("type").and_then(Value::as_str) != Some("app_mention") {
            return None;
        }

        match serde_json::from_value::<MentionEvent>(event) {
            Ok(mut mention) => {
                mention.event_id = event_id;
                Some(mention)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Malformed app_mention event");
                None
            }
        }
    }
}

/// A posted message that subsequent edits apply to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageTarget {
    /// Channel holding the message.
    pub channel: String,
    /// Timestamp identifying the message.
    pub ts: String,
}

impl MessageTarget {
    pub fn new(channel: impl Into<String>, ts: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            ts: ts.into(),
        }
    }
}
