//! mention-bot - answers Slack `@mentions` with streamed chat completions.
//!
//! A mention gets a `Typing...` placeholder in its thread, which is then
//! edited in place as the completion streams in. Interim edits are paced by
//! an adaptive scheduler; the last edit carries the full answer as Block Kit.
//! Earlier turns of the thread are kept in Redis (or memory) and sent as
//! context with each new question.
//!
//! ## Architecture
//!
//! ```text
//! Socket Mode ──┐
//!               ├─► MentionBridge ─► CompletionClient (SSE)
//! Events API ───┘        │                  │ fragments
//!                        │                  ▼
//!                   HistoryStore     StreamingSession ─► MessageSink (Slack)
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod bridge;
pub mod error;
pub mod llm;
pub mod message;
pub mod routes;
pub mod slack;
pub mod socket;
pub mod stream;
pub mod traits;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use bridge::{BridgeSettings, MentionBridge, TurnOutcome, TurnState};
pub use error::BridgeError;
pub use llm::{ChatMessage, CompletionClient, CompletionError, OpenAiClient};
pub use message::{EventsApiPayload, MentionEvent, MessageTarget};
pub use routes::{build_router, compute_signature, AppState};
pub use slack::{SlackClient, SlackMessageSink};
pub use socket::SocketModeRunner;
pub use stream::{StreamingSession, UpdateScheduler};
pub use traits::{ChannelError, ChannelResult, MessageSink};

use mention_common::config::Config;
use mention_common::history::{create_history_store, HistoryStore};
use mention_common::validation::EntryMode;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Wire a bridge to Slack and the completion API described by `config`.
pub fn build_bridge(
    config: &Config,
    history: Arc<dyn HistoryStore>,
) -> (Arc<SlackClient>, Arc<MentionBridge>) {
    let slack = Arc::new(SlackClient::from_config(&config.slack));
    let sink = Arc::new(SlackMessageSink::new(
        slack.clone(),
        config.streaming.disclaimer.clone(),
    ));
    let completion = Arc::new(OpenAiClient::from_config(&config.llm));

    let bridge = Arc::new(MentionBridge::new(
        sink,
        completion,
        history,
        BridgeSettings::from_config(config),
    ));
    (slack, bridge)
}

/// Start the Events API HTTP server and serve until Ctrl-C.
pub async fn start_server(config: &Config, bridge: Arc<MentionBridge>) -> anyhow::Result<()> {
    let addr: SocketAddr = config.listen_address().parse()?;
    let state = AppState::new(bridge, config.slack.signing_secret.clone());
    let router = build_router(state);

    tracing::info!("Starting mention-bot Events API on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}

/// Build every collaborator from `config` and run the chosen entry point.
pub async fn run(config: Config, mode: EntryMode) -> anyhow::Result<()> {
    let history = create_history_store(&config.history)?;
    tracing::info!(backend = history.backend(), "History store ready");

    let (slack, bridge) = build_bridge(&config, history);

    match slack.auth_test().await {
        Ok(user_id) => tracing::info!(bot_user = %user_id, "Slack token verified"),
        Err(ChannelError::Auth(e)) => anyhow::bail!("Slack rejected the bot token: {e}"),
        Err(e) => tracing::warn!(error = %e, "Could not verify Slack token, continuing"),
    }

    match mode {
        EntryMode::Socket => {
            SocketModeRunner::new(
                slack,
                bridge,
                Duration::from_secs(config.slack.reconnect_delay_secs),
            )
            .run()
            .await
        }
        EntryMode::Http => start_server(&config, bridge).await,
    }
}
