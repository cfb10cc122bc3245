//! Bridge between Slack mentions and the completion API.
//!
//! For each mention the bridge:
//! 1. Strips mention tokens and resolves the conversation (thread root)
//! 2. Posts a `Typing...` placeholder into the thread
//! 3. Loads earlier turns of the thread from the history store
//! 4. Streams the completion into the placeholder through a [`StreamingSession`]
//! 5. Records the question and the answer as a new pair of turns
//!
//! Only a failure to post the placeholder, a failed completion or a failed
//! final edit fail the turn. History problems are logged and tolerated.

use crate::error::BridgeError;
use crate::llm::{build_prompt, CompletionClient};
use crate::message::MentionEvent;
use crate::stream::StreamingSession;
use crate::traits::MessageSink;
use mention_common::config::Config;
use mention_common::history::{ConversationTurn, HistoryStore};
use mention_common::logging::generate_trace_id;
use mention_common::mention_span;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::Instrument;

// ============================================================================
// Types
// ============================================================================

/// Stages of one handled mention, used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    ReceivedMention,
    PlaceholderSent,
    HistoryLoaded,
    Generating,
    Completed,
}

impl TurnState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ReceivedMention => "received_mention",
            Self::PlaceholderSent => "placeholder_sent",
            Self::HistoryLoaded => "history_loaded",
            Self::Generating => "generating",
            Self::Completed => "completed",
        }
    }
}

/// Result of a successfully answered mention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    /// Thread root the turn was recorded under.
    pub conversation_id: String,
    /// Final answer text.
    pub reply: String,
    /// Number of interim edits issued while streaming.
    pub interim_edits: u32,
}

/// Tunables of the bridge.
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub system_prompt: String,
    /// Initial minimum interval between interim edits.
    pub min_interval: Duration,
    /// Expiry applied to a conversation on every append.
    pub history_ttl: Duration,
    /// Bound on each history read or append.
    pub history_timeout: Duration,
}

impl BridgeSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            system_prompt: config.llm.system_prompt.clone(),
            min_interval: config.streaming.min_interval(),
            history_ttl: config.history.ttl(),
            history_timeout: Duration::from_secs(config.history.timeout_secs),
        }
    }
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

// ============================================================================
// Bridge
// ============================================================================

/// Answers mentions by streaming completions into Slack threads.
///
/// Holds only shared, thread-safe collaborators; all per-mention state lives
/// in the task handling that mention.
pub struct MentionBridge {
    sink: Arc<dyn MessageSink>,
    completion: Arc<dyn CompletionClient>,
    history: Arc<dyn HistoryStore>,
    settings: BridgeSettings,
}

impl MentionBridge {
    pub fn new(
        sink: Arc<dyn MessageSink>,
        completion: Arc<dyn CompletionClient>,
        history: Arc<dyn HistoryStore>,
        settings: BridgeSettings,
    ) -> Self {
        Self {
            sink,
            completion,
            history,
            settings,
        }
    }

    /// Handle one mention from receipt to the recorded turn.
    pub async fn process(&self, event: MentionEvent) -> Result<TurnOutcome, BridgeError> {
        let trace_id = generate_trace_id();
        let span = mention_span!(
            trace_id,
            channel = %event.channel,
            ts = %event.ts,
            conversation_id = %event.conversation_id()
        );

        async {
            let result = self.run_turn(&event).await;
            match &result {
                Ok(outcome) => tracing::info!(
                    state = TurnState::Completed.as_str(),
                    reply_len = outcome.reply.len(),
                    interim_edits = outcome.interim_edits,
                    "Mention answered"
                ),
                Err(e) => tracing::error!(kind = e.kind(), error = %e, "Mention failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run_turn(&self, event: &MentionEvent) -> Result<TurnOutcome, BridgeError> {
        let conversation_id = event.conversation_id().to_string();
        let question = event.prompt_text();
        tracing::debug!(
            state = TurnState::ReceivedMention.as_str(),
            user = event.user.as_deref().unwrap_or("unknown"),
            question_len = question.len(),
            "Mention received"
        );

        let target = self
            .sink
            .post_placeholder(&event.channel, &conversation_id)
            .await
            .map_err(BridgeError::PlaceholderSend)?;
        tracing::debug!(
            state = TurnState::PlaceholderSent.as_str(),
            placeholder_ts = %target.ts,
            "Placeholder posted"
        );

        let history = self.load_history(&conversation_id).await;
        tracing::debug!(
            state = TurnState::HistoryLoaded.as_str(),
            turns = history.len(),
            "History loaded"
        );

        let prompt = build_prompt(&self.settings.system_prompt, &history, &question);
        let mut fragments = self.completion.stream(prompt).await?;
        tracing::debug!(state = TurnState::Generating.as_str(), "Streaming completion");

        let mut session =
            StreamingSession::new(self.sink.as_ref(), target, self.settings.min_interval);
        while let Some(fragment) = fragments.recv().await {
            session.push(&fragment?).await;
        }

        let summary = session.finish().await.map_err(BridgeError::FinalEdit)?;
        self.record_turn(&conversation_id, question, &summary.text).await;

        Ok(TurnOutcome {
            conversation_id,
            reply: summary.text,
            interim_edits: summary.interim_edits,
        })
    }

    /// Load earlier turns, treating any failure as an empty history.
    async fn load_history(&self, conversation_id: &str) -> Vec<ConversationTurn> {
        let load = self.history.load(conversation_id);
        match self.bounded("history read", load).await {
            Ok(Ok(turns)) => turns,
            Ok(Err(e)) => {
                let err = BridgeError::HistoryRead(e);
                tracing::warn!(
                    kind = err.kind(),
                    backend = self.history.backend(),
                    error = %err,
                    "Continuing without history"
                );
                Vec::new()
            }
            Err(err) => {
                tracing::warn!(kind = err.kind(), error = %err, "Continuing without history");
                Vec::new()
            }
        }
    }

    /// Append the question then the answer. Stops at the first failure so a
    /// lone question is never followed by an unrelated answer.
    async fn record_turn(&self, conversation_id: &str, question: String, answer: &str) {
        let turns = [
            ConversationTurn::user(question),
            ConversationTurn::assistant(answer),
        ];

        for turn in &turns {
            let append = self
                .history
                .append(conversation_id, turn, self.settings.history_ttl);
            let err = match self.bounded("history write", append).await {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => BridgeError::HistoryWrite(e),
                Err(timeout) => timeout,
            };
            tracing::warn!(
                kind = err.kind(),
                role = turn.role.as_str(),
                error = %err,
                "Turn not recorded"
            );
            return;
        }
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = T>,
    ) -> Result<T, BridgeError> {
        let after = self.settings.history_timeout;
        tokio::time::timeout(after, fut)
            .await
            .map_err(|_| BridgeError::Timeout { operation, after })
    }

    /// Start a background processor that handles mentions from a channel.
    ///
    /// Each mention runs on its own task. Once the channel closes, mentions
    /// already in flight are allowed to finish.
    pub fn spawn_processor(
        bridge: Arc<Self>,
        mut rx: mpsc::Receiver<MentionEvent>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!("Mention processor started");
            let mut in_flight = JoinSet::new();

            loop {
                tokio::select! {
                    event = rx.recv() => {
                        let Some(event) = event else { break };
                        let bridge = bridge.clone();
                        in_flight.spawn(async move {
                            // Outcome and failures are logged inside `process`.
                            let _ = bridge.process(event).await;
                        });
                    }
                    Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                        if let Err(e) = joined {
                            tracing::error!(error = %e, "Mention task panicked");
                        }
                    }
                }
            }

            while let Some(joined) = in_flight.join_next().await {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "Mention task panicked");
                }
            }
            tracing::info!("Mention processor stopped");
        })
    }
}
