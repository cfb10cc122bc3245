//! Slack Socket Mode runner.
//!
//! Keeps a WebSocket open to Slack, acknowledges every envelope before doing
//! any work, and hands `app_mention` events to the mention processor.
//!
//! # Lifecycle
//!
//! ```text
//! apps.connections.open ─► connect ─► hello ─► envelopes ... ─► disconnect
//!          ▲                                                        │
//!          └──────────────────── reconnect ◄────────────────────────┘
//! ```

use crate::bridge::MentionBridge;
use crate::message::{EventsApiPayload, MentionEvent};
use crate::slack::SlackClient;
use crate::traits::{ChannelError, ChannelResult};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

/// Mentions queued between the socket reader and the processor.
const EVENT_QUEUE: usize = 64;

/// A Socket Mode frame.
#[derive(Debug, Deserialize)]
struct SocketEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    envelope_id: Option<String>,
    #[serde(default)]
    payload: Option<Value>,
    #[serde(default)]
    retry_attempt: Option<u32>,
    #[serde(default)]
    reason: Option<String>,
}

/// What to do with one received frame.
#[derive(Debug, PartialEq, Eq)]
pub enum FrameAction {
    /// Connection established.
    Hello,
    /// Slack asked us to reconnect.
    Disconnect(String),
    /// Acknowledge the envelope, then handle the mention if there is one.
    Ack {
        envelope_id: String,
        mention: Option<MentionEvent>,
    },
    /// Nothing to do.
    Ignore,
}

/// Decode a text frame.
pub fn parse_frame(text: &str) -> FrameAction {
    let envelope: SocketEnvelope = match serde_json::from_str(text) {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!(error = %e, "Unreadable Socket Mode frame");
            return FrameAction::Ignore;
        }
    };

    match envelope.kind.as_str() {
        "hello" => FrameAction::Hello,
        "disconnect" => {
            FrameAction::Disconnect(envelope.reason.unwrap_or_else(|| "unknown".into()))
        }
        kind => {
            let Some(envelope_id) = envelope.envelope_id else {
                tracing::debug!(kind, "Ignoring frame without envelope id");
                return FrameAction::Ignore;
            };

            let redelivery = envelope.retry_attempt.unwrap_or(0) > 0;
            let mention = if kind == "events_api" && !redelivery {
                envelope
                    .payload
                    .and_then(|p| serde_json::from_value::<EventsApiPayload>(p).ok())
                    .and_then(EventsApiPayload::into_mention)
            } else {
                if redelivery {
                    tracing::info!(envelope_id = %envelope_id, "Skipping redelivered envelope");
                }
                None
            };

            FrameAction::Ack {
                envelope_id,
                mention,
            }
        }
    }
}

/// Acknowledgement frame for an envelope.
pub fn ack_frame(envelope_id: &str) -> String {
    json!({ "envelope_id": envelope_id }).to_string()
}

/// Why a single WebSocket session ended.
enum SessionEnd {
    Disconnect(String),
    Closed,
}

/// Runs the bot over Socket Mode until interrupted.
pub struct SocketModeRunner {
    client: Arc<SlackClient>,
    bridge: Arc<MentionBridge>,
    reconnect_delay: Duration,
}

impl SocketModeRunner {
    pub fn new(
        client: Arc<SlackClient>,
        bridge: Arc<MentionBridge>,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            client,
            bridge,
            reconnect_delay,
        }
    }

    /// Run until Ctrl-C or an authentication failure.
    ///
    /// Mentions already being answered are allowed to finish on shutdown.
    pub async fn run(self) -> anyhow::Result<()> {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE);
        let processor = MentionBridge::spawn_processor(self.bridge.clone(), rx);

        let result = tokio::select! {
            r = self.connect_loop(&tx) => r,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
        };

        drop(tx);
        if let Err(e) = processor.await {
            tracing::error!(error = %e, "Mention processor failed");
        }
        result
    }

    async fn connect_loop(&self, tx: &mpsc::Sender<MentionEvent>) -> anyhow::Result<()> {
        loop {
            match self.run_session(tx).await {
                Ok(SessionEnd::Disconnect(reason)) => {
                    tracing::info!(reason = %reason, "Slack requested reconnect");
                    continue;
                }
                Ok(SessionEnd::Closed) => {
                    tracing::warn!("Socket Mode connection closed");
                }
                Err(ChannelError::Auth(e)) => {
                    return Err(anyhow::anyhow!("Socket Mode authentication failed: {e}"));
                }
                Err(ChannelError::RateLimited { retry_after_secs }) => {
                    tracing::warn!(retry_after_secs, "Socket Mode connect rate limited");
                    tokio::time::sleep(Duration::from_secs(retry_after_secs)).await;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Socket Mode connection error");
                }
            }

            tokio::time::sleep(self.reconnect_delay).await;
        }
    }

    async fn run_session(&self, tx: &mpsc::Sender<MentionEvent>) -> ChannelResult<SessionEnd> {
        let url = self.client.open_socket_connection().await?;

        let (ws_stream, _) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| ChannelError::Connection(format!("WebSocket connect failed: {e}")))?;
        let (mut write, mut read) = ws_stream.split();

        while let Some(frame) = read.next().await {
            let text = match frame {
                Ok(Message::Text(t)) => t,
                Ok(Message::Close(_)) => return Ok(SessionEnd::Closed),
                Ok(_) => continue,
                Err(e) => {
                    return Err(ChannelError::Connection(format!("WebSocket read failed: {e}")))
                }
            };

            match parse_frame(&text) {
                FrameAction::Hello => tracing::info!("Socket Mode connected"),
                FrameAction::Disconnect(reason) => return Ok(SessionEnd::Disconnect(reason)),
                FrameAction::Ack {
                    envelope_id,
                    mention,
                } => {
                    write
                        .send(Message::Text(ack_frame(&envelope_id)))
                        .await
                        .map_err(|e| ChannelError::Connection(format!("Ack failed: {e}")))?;

                    if let Some(mention) = mention {
                        if tx.send(mention).await.is_err() {
                            return Err(ChannelError::Internal("Mention processor stopped".into()));
                        }
                    }
                }
                FrameAction::Ignore => {}
            }
        }

        Ok(SessionEnd::Closed)
    }
}
