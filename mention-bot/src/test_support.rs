//! In-process fakes for unit tests.

use crate::llm::{ChatMessage, CompletionClient, CompletionError, FragmentStream};
use crate::message::MessageTarget;
use crate::traits::{ChannelError, ChannelResult, MessageSink};
use async_trait::async_trait;
use mention_common::history::{ConversationTurn, HistoryError, HistoryResult, HistoryStore};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

/// Timestamp of every placeholder posted by [`RecordingSink`].
pub const PLACEHOLDER_TS: &str = "1700000999.000900";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkCall {
    Placeholder { channel: String, thread_ts: String },
    Interim { ts: String, text: String },
    Final { ts: String, text: String },
}

/// Sink that records every call and can be told to fail.
#[derive(Default)]
pub struct RecordingSink {
    calls: Mutex<Vec<SinkCall>>,
    fail_placeholder: bool,
    fail_interim: bool,
    fail_final: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_placeholder(mut self) -> Self {
        self.fail_placeholder = true;
        self
    }

    pub fn fail_interim(mut self) -> Self {
        self.fail_interim = true;
        self
    }

    pub fn fail_final(mut self) -> Self {
        self.fail_final = true;
        self
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn interim_texts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                SinkCall::Interim { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn final_texts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                SinkCall::Final { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: SinkCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl MessageSink for RecordingSink {
    async fn post_placeholder(
        &self,
        channel: &str,
        thread_ts: &str,
    ) -> ChannelResult<MessageTarget> {
        if self.fail_placeholder {
            return Err(ChannelError::SendFailed("channel_not_found".into()));
        }
        self.record(SinkCall::Placeholder {
            channel: channel.into(),
            thread_ts: thread_ts.into(),
        });
        Ok(MessageTarget::new(channel, PLACEHOLDER_TS))
    }

    async fn emit_interim(&self, target: &MessageTarget, text: &str) -> ChannelResult<()> {
        self.record(SinkCall::Interim {
            ts: target.ts.clone(),
            text: text.into(),
        });
        if self.fail_interim {
            return Err(ChannelError::RateLimited { retry_after_secs: 1 });
        }
        Ok(())
    }

    async fn emit_final(&self, target: &MessageTarget, text: &str) -> ChannelResult<()> {
        self.record(SinkCall::Final {
            ts: target.ts.clone(),
            text: text.into(),
        });
        if self.fail_final {
            return Err(ChannelError::SendFailed("msg_too_long".into()));
        }
        Ok(())
    }
}

/// Completion client that replays fixed fragments and records prompts.
#[derive(Default)]
pub struct ScriptedCompletion {
    fragments: Vec<String>,
    fail_start: bool,
    fail_mid_stream: bool,
    prompts: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedCompletion {
    pub fn new(fragments: &[&str]) -> Self {
        Self {
            fragments: fragments.iter().map(|f| f.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn failing_start() -> Self {
        Self {
            fail_start: true,
            ..Self::default()
        }
    }

    /// Replay the fragments, then fail instead of ending cleanly.
    pub fn failing_mid_stream(mut self) -> Self {
        self.fail_mid_stream = true;
        self
    }

    pub fn prompts(&self) -> Vec<Vec<ChatMessage>> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionClient for ScriptedCompletion {
    async fn stream(&self, messages: Vec<ChatMessage>) -> Result<FragmentStream, CompletionError> {
        self.prompts.lock().unwrap().push(messages);
        if self.fail_start {
            return Err(CompletionError::Status {
                status: 503,
                body: "overloaded".into(),
            });
        }

        let (tx, rx) = mpsc::channel(self.fragments.len() + 1);
        for fragment in &self.fragments {
            tx.try_send(Ok(fragment.clone())).unwrap();
        }
        if self.fail_mid_stream {
            tx.try_send(Err(CompletionError::IdleTimeout(Duration::from_secs(60))))
                .unwrap();
        }
        Ok(rx)
    }
}

/// History store whose every call fails.
pub struct FailingHistory;

#[async_trait]
impl HistoryStore for FailingHistory {
    async fn load(&self, _conversation_id: &str) -> HistoryResult<Vec<ConversationTurn>> {
        Err(HistoryError::Connection("connection refused".into()))
    }

    async fn append(
        &self,
        _conversation_id: &str,
        _turn: &ConversationTurn,
        _ttl: Duration,
    ) -> HistoryResult<()> {
        Err(HistoryError::Connection("connection refused".into()))
    }

    fn backend(&self) -> &'static str {
        "failing"
    }
}

/// History store that never answers.
pub struct StalledHistory;

#[async_trait]
impl HistoryStore for StalledHistory {
    async fn load(&self, _conversation_id: &str) -> HistoryResult<Vec<ConversationTurn>> {
        std::future::pending().await
    }

    async fn append(
        &self,
        _conversation_id: &str,
        _turn: &ConversationTurn,
        _ttl: Duration,
    ) -> HistoryResult<()> {
        std::future::pending().await
    }

    fn backend(&self) -> &'static str {
        "stalled"
    }
}
