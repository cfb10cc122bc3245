//! Streaming chat completion client.
//!
//! Talks to any OpenAI-compatible `/chat/completions` endpoint with
//! `stream: true` and forwards each `choices[0].delta.content` fragment over
//! an mpsc channel as soon as it arrives.
//!
//! # Wire Format
//!
//! ```text
//! data: {"choices":[{"delta":{"content":"Hel"}}]}
//!
//! data: {"choices":[{"delta":{"content":"lo"}}]}
//!
//! data: [DONE]
//! ```

use async_trait::async_trait;
use futures_util::StreamExt;
use mention_common::config::LlmConfig;
use mention_common::history::{ConversationTurn, Role};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;

/// Fragments buffered between the HTTP reader and the streaming session.
const FRAGMENT_BUFFER: usize = 64;

// ============================================================================
// Types
// ============================================================================

/// Role of a prompt message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One message of a chat completion prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

impl From<&ConversationTurn> for ChatMessage {
    fn from(turn: &ConversationTurn) -> Self {
        let role = match turn.role {
            Role::User => ChatRole::User,
            Role::Assistant => ChatRole::Assistant,
        };
        Self {
            role,
            content: turn.text.clone(),
        }
    }
}

/// Assemble a prompt: system instruction, prior turns, then the new question.
pub fn build_prompt(
    system_prompt: &str,
    history: &[ConversationTurn],
    user_text: &str,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(system_prompt));
    messages.extend(history.iter().map(ChatMessage::from));
    messages.push(ChatMessage::user(user_text));
    messages
}

/// Completion errors.
#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("Completion request failed: {0}")]
    Request(String),

    #[error("Completion API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Completion API error: {0}")]
    Api(String),

    #[error("Completion stream failed: {0}")]
    Stream(String),

    #[error("No fragment received for {0:?}")]
    IdleTimeout(Duration),
}

/// Receiving end of a completion stream.
///
/// Yields fragments in order; the channel closes after the last fragment.
/// An `Err` item ends the stream.
pub type FragmentStream = mpsc::Receiver<Result<String, CompletionError>>;

/// Source of streamed completions.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Start a completion for the given prompt.
    async fn stream(&self, messages: Vec<ChatMessage>) -> Result<FragmentStream, CompletionError>;
}

// ============================================================================
// SSE Parsing
// ============================================================================

/// One decoded server-sent event line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Fragment(String),
    Done,
}

/// Incremental parser for `data:` lines.
///
/// Bytes are buffered until a full line is available, so multi-byte
/// characters split across network chunks decode correctly.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a network chunk and return the events completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<SseEvent>, CompletionError> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(event) = parse_line(&String::from_utf8_lossy(&line))? {
                events.push(event);
            }
        }
        Ok(events)
    }

    /// Flush a trailing line that was not newline-terminated.
    pub fn finish(&mut self) -> Result<Option<SseEvent>, CompletionError> {
        let rest = std::mem::take(&mut self.buffer);
        parse_line(&String::from_utf8_lossy(&rest))
    }
}

fn parse_line(line: &str) -> Result<Option<SseEvent>, CompletionError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let Some(data) = line.strip_prefix("data:") else {
        // Blank separators, comments, `event:` and `id:` fields.
        return Ok(None);
    };
    let data = data.trim();

    if data == "[DONE]" {
        return Ok(Some(SseEvent::Done));
    }
    if data.is_empty() {
        return Ok(None);
    }

    let value: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "Skipping malformed completion chunk");
            return Ok(None);
        }
    };

    if let Some(error) = value.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| error.to_string(), String::from);
        return Err(CompletionError::Api(message));
    }

    Ok(value
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(|s| SseEvent::Fragment(s.to_string())))
}

// ============================================================================
// OpenAI-compatible Client
// ============================================================================

/// Streaming client for OpenAI-compatible chat completion APIs.
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    idle_timeout: Duration,
}

impl OpenAiClient {
    /// Create a client from configuration.
    pub fn from_config(config: &LlmConfig) -> Self {
        // No overall timeout; silence is bounded by `idle_timeout`.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .tcp_nodelay(true)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
        }
    }

    /// Override the idle timeout.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn stream(&self, messages: Vec<ChatMessage>) -> Result<FragmentStream, CompletionError> {
        let body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "stream": true,
            "messages": &messages,
        });

        let mut req = self
            .client
            .post(self.endpoint())
            .header("Accept", "text/event-stream")
            .json(&body);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }

        tracing::debug!(model = %self.model, messages = messages.len(), "Starting completion");

        let resp = tokio::time::timeout(self.idle_timeout, req.send())
            .await
            .map_err(|_| CompletionError::IdleTimeout(self.idle_timeout))?
            .map_err(|e| CompletionError::Request(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CompletionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let (tx, rx) = mpsc::channel(FRAGMENT_BUFFER);
        let idle_timeout = self.idle_timeout;

        tokio::spawn(async move {
            let mut stream = resp.bytes_stream();
            let mut parser = SseParser::new();

            loop {
                let chunk = match tokio::time::timeout(idle_timeout, stream.next()).await {
                    Ok(Some(Ok(chunk))) => chunk,
                    Ok(Some(Err(e))) => {
                        let _ = tx.send(Err(CompletionError::Stream(e.to_string()))).await;
                        return;
                    }
                    Ok(None) => break,
                    Err(_) => {
                        tracing::warn!(?idle_timeout, "Completion stream went idle");
                        let _ = tx.send(Err(CompletionError::IdleTimeout(idle_timeout))).await;
                        return;
                    }
                };

                let events = match parser.push(&chunk) {
                    Ok(events) => events,
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                };

                for event in events {
                    match event {
                        SseEvent::Fragment(text) => {
                            if tx.send(Ok(text)).await.is_err() {
                                // Receiver dropped.
                                return;
                            }
                        }
                        SseEvent::Done => return,
                    }
                }
            }

            match parser.finish() {
                Ok(Some(SseEvent::Fragment(text))) => {
                    let _ = tx.send(Ok(text)).await;
                }
                Ok(_) => {}
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                }
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sse_body(fragments: &[&str]) -> String {
        let mut body = String::new();
        for fragment in fragments {
            let chunk = json!({"choices": [{"index": 0, "delta": {"content": fragment}}]});
            body.push_str(&format!("data: {chunk}\n\n"));
        }
        body.push_str("data: [DONE]\n\n");
        body
    }

    fn config_for(server: &MockServer) -> LlmConfig {
        LlmConfig {
            api_key: Some("sk-test".into()),
            base_url: format!("{}/v1", server.uri()),
            model: "test-model".into(),
            ..LlmConfig::default()
        }
    }

    async fn collect(mut rx: FragmentStream) -> Result<Vec<String>, CompletionError> {
        let mut out = Vec::new();
        while let Some(item) = rx.recv().await {
            out.push(item?);
        }
        Ok(out)
    }

    #[test]
    fn prompt_order() {
        let history = vec![
            ConversationTurn::user("What is 2+2?"),
            ConversationTurn::assistant("4"),
        ];
        let prompt = build_prompt("Be brief.", &history, "And 3+3?");

        assert_eq!(prompt.len(), 4);
        assert_eq!(prompt[0], ChatMessage::system("Be brief."));
        assert_eq!(prompt[1].role, ChatRole::User);
        assert_eq!(prompt[2].role, ChatRole::Assistant);
        assert_eq!(prompt[3], ChatMessage::user("And 3+3?"));
    }

    #[test]
    fn parser_handles_split_chunks() {
        let mut parser = SseParser::new();
        let body = sse_body(&["Hé", "llo"]);
        let bytes = body.as_bytes();

        // Split inside the multi-byte `é`.
        let split = body.find('é').unwrap() + 1;
        let mut events = parser.push(&bytes[..split]).unwrap();
        events.extend(parser.push(&bytes[split..]).unwrap());

        assert_eq!(
            events,
            vec![
                SseEvent::Fragment("Hé".into()),
                SseEvent::Fragment("llo".into()),
                SseEvent::Done
            ]
        );
    }

    #[test]
    fn parser_skips_role_only_and_comment_lines() {
        let mut parser = SseParser::new();
        let events = parser
            .push(b": keep-alive\r\n\r\ndata: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\r\n\r\ndata: not json\n\n")
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn parser_reports_stream_error() {
        let mut parser = SseParser::new();
        let err = parser
            .push(b"data: {\"error\":{\"message\":\"overloaded\"}}\n\n")
            .unwrap_err();
        assert!(matches!(err, CompletionError::Api(ref m) if m == "overloaded"));
    }

    #[test]
    fn parser_flushes_unterminated_line() {
        let mut parser = SseParser::new();
        assert!(parser
            .push(b"data: {\"choices\":[{\"delta\":{\"content\":\"end\"}}]}")
            .unwrap()
            .is_empty());
        assert_eq!(
            parser.finish().unwrap(),
            Some(SseEvent::Fragment("end".into()))
        );
    }

    #[tokio::test]
    async fn streams_fragments_in_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({"model": "test-model", "stream": true})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(sse_body(&["2", "+2", " is ", "4"])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = OpenAiClient::from_config(&config_for(&server));
        let rx = client
            .stream(vec![ChatMessage::user("What is 2+2?")])
            .await
            .unwrap();

        assert_eq!(collect(rx).await.unwrap().concat(), "2+2 is 4");
    }

    #[tokio::test]
    async fn done_ends_stream() {
        let server = MockServer::start().await;
        let mut body = sse_body(&["a"]);
        body.push_str("data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n\n");
        Mock::given(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let client = OpenAiClient::from_config(&config_for(&server));
        let rx = client.stream(vec![ChatMessage::user("x")]).await.unwrap();
        assert_eq!(collect(rx).await.unwrap(), vec!["a"]);
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let client = OpenAiClient::from_config(&config_for(&server));
        let err = client.stream(vec![ChatMessage::user("x")]).await.unwrap_err();
        assert!(matches!(err, CompletionError::Status { status: 401, .. }));
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let server = MockServer::start().await;
        Mock::given(path("/v1/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(sse_body(&["late"]))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let client = OpenAiClient::from_config(&config_for(&server))
            .with_idle_timeout(Duration::from_millis(200));
        let err = client.stream(vec![ChatMessage::user("x")]).await.unwrap_err();
        assert!(matches!(err, CompletionError::IdleTimeout(d) if d == Duration::from_millis(200)));
    }
}
