//! Slack Web API client and message sink.
//!
//! Only the handful of Web API methods the bot needs are wrapped:
//! `auth.test`, `chat.postMessage`, `chat.update` and
//! `apps.connections.open` (Socket Mode).

pub mod format;

use crate::message::MessageTarget;
use crate::traits::{interim_text, ChannelError, ChannelResult, MessageSink, TYPING_SUFFIX};
use async_trait::async_trait;
use format::Block;
use mention_common::config::SlackConfig;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Slack `error` codes that mean the token itself is unusable.
const AUTH_ERRORS: &[&str] = &[
    "not_authed",
    "invalid_auth",
    "account_inactive",
    "token_revoked",
    "token_expired",
];

/// Thin Slack Web API client.
pub struct SlackClient {
    bot_token: String,
    app_token: Option<String>,
    api_base: String,
    client: Client,
}

impl SlackClient {
    /// Create a client for the given bot token.
    pub fn new(bot_token: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self::with_timeout(bot_token, api_base, Duration::from_secs(30))
    }

    /// Create a client with an explicit request timeout.
    pub fn with_timeout(
        bot_token: impl Into<String>,
        api_base: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            bot_token: bot_token.into(),
            app_token: None,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Create a client from configuration.
    pub fn from_config(config: &SlackConfig) -> Self {
        let mut client = Self::with_timeout(
            config.bot_token.clone(),
            config.api_base.clone(),
            Duration::from_secs(config.request_timeout_secs),
        );
        client.app_token = config.app_token.clone();
        client
    }

    /// Set the app-level token used for Socket Mode.
    pub fn with_app_token(mut self, app_token: impl Into<String>) -> Self {
        self.app_token = Some(app_token.into());
        self
    }

    /// Call a Web API method and return the decoded body of a successful call.
    async fn call(&self, method: &str, token: &str, body: &Value) -> ChannelResult<Value> {
        let url = format!("{}/{}", self.api_base, method);

        let resp = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(|e| ChannelError::Connection(format!("Slack {method} request failed: {e}")))?;

        if resp.status() == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(1);
            tracing::warn!(method, retry_after_secs, "Slack rate limit hit");
            return Err(ChannelError::RateLimited { retry_after_secs });
        }

        let data: Value = resp
            .json()
            .await
            .map_err(|e| ChannelError::Internal(format!("Failed to parse {method} response: {e}")))?;

        if data.get("ok").and_then(Value::as_bool).unwrap_or(false) {
            return Ok(data);
        }

        let error = data
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown");

        Err(match error {
            "ratelimited" => ChannelError::RateLimited { retry_after_secs: 1 },
            e if AUTH_ERRORS.contains(&e) => ChannelError::Auth(format!("Slack {method}: {e}")),
            e => ChannelError::SendFailed(format!("Slack {method} failed: {e}")),
        })
    }

    /// Verify the bot token. Returns the bot's user id.
    pub async fn auth_test(&self) -> ChannelResult<String> {
        let data = self.call("auth.test", &self.bot_token, &json!({})).await?;
        data.get("user_id")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| ChannelError::Internal("auth.test returned no user_id".into()))
    }

    /// Post a message, optionally as a thread reply. Returns the message ts.
    pub async fn post_message(
        &self,
        channel: &str,
        thread_ts: Option<&str>,
        text: &str,
    ) -> ChannelResult<String> {
        let mut body = json!({
            "channel": channel,
            "text": text,
        });
        if let Some(thread_ts) = thread_ts {
            body["thread_ts"] = json!(thread_ts);
        }

        let data = self.call("chat.postMessage", &self.bot_token, &body).await?;
        data.get("ts")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| ChannelError::Internal("chat.postMessage returned no ts".into()))
    }

    /// Replace the text (and optionally the blocks) of a posted message.
    pub async fn update_message(
        &self,
        channel: &str,
        ts: &str,
        text: &str,
        blocks: Option<&[Block]>,
    ) -> ChannelResult<()> {
        let mut body = json!({
            "channel": channel,
            "ts": ts,
            "text": text,
        });
        if let Some(blocks) = blocks {
            body["blocks"] = serde_json::to_value(blocks)
                .map_err(|e| ChannelError::InvalidMessage(e.to_string()))?;
        }

        self.call("chat.update", &self.bot_token, &body).await?;
        Ok(())
    }

    /// Request a Socket Mode WebSocket URL using the app-level token.
    pub async fn open_socket_connection(&self) -> ChannelResult<String> {
        let app_token = self
            .app_token
            .as_deref()
            .ok_or_else(|| ChannelError::Auth("Socket Mode requires an app token".into()))?;

        let data = self
            .call("apps.connections.open", app_token, &json!({}))
            .await?;
        data.get("url")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| ChannelError::Internal("apps.connections.open returned no url".into()))
    }
}

/// Message sink that streams into a Slack thread.
pub struct SlackMessageSink {
    client: Arc<SlackClient>,
    disclaimer: String,
}

impl SlackMessageSink {
    pub fn new(client: Arc<SlackClient>, disclaimer: impl Into<String>) -> Self {
        Self {
            client,
            disclaimer: disclaimer.into(),
        }
    }
}

#[async_trait]
impl MessageSink for SlackMessageSink {
    async fn post_placeholder(
        &self,
        channel: &str,
        thread_ts: &str,
    ) -> ChannelResult<MessageTarget> {
        let ts = self
            .client
            .post_message(channel, Some(thread_ts), TYPING_SUFFIX)
            .await?;
        Ok(MessageTarget::new(channel, ts))
    }

    async fn emit_interim(&self, target: &MessageTarget, text: &str) -> ChannelResult<()> {
        self.client
            .update_message(&target.channel, &target.ts, &interim_text(text), None)
            .await
    }

    async fn emit_final(&self, target: &MessageTarget, text: &str) -> ChannelResult<()> {
        let blocks = format::final_message_blocks(text, &self.disclaimer);
        self.client
            .update_message(&target.channel, &target.ts, text, Some(&blocks))
            .await
    }
}
