//! Conversation history store.
//!
//! Prior turns of a thread are kept in an external cache so that follow-up
//! mentions carry context. The store supports two backends:
//!
//! - **In-Memory**: For local development and testing
//! - **Redis**: For production, shared by every bot process
//!
//! # Data Layout
//!
//! Each conversation is one Redis list at `{prefix}{conversation_id}` holding
//! JSON-encoded turns in chronological order. Every append refreshes the
//! list's expiry, so a conversation lives for one TTL after its latest turn.
//!
//! The store only reads and appends. Reads and appends are not transactional:
//! two mentions racing in the same thread may interleave their turn pairs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::config::HistoryConfig;

// ============================================================================
// Error Types
// ============================================================================

/// History store errors.
#[derive(Error, Debug)]
pub enum HistoryError {
    /// Connection error to the backend.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A backend command failed.
    #[error("Command error: {0}")]
    Command(String),

    /// A turn could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for history operations.
pub type HistoryResult<T> = Result<T, HistoryError>;

// ============================================================================
// Turn Types
// ============================================================================

/// Author of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Role name as used by chat completion APIs.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One recorded message of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
}

impl ConversationTurn {
    /// A turn written by the person mentioning the bot.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    /// A turn generated by the bot.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

// ============================================================================
// History Store Trait
// ============================================================================

/// Trait for conversation history backends.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Load all turns of a conversation, oldest first. Unknown or expired
    /// conversations yield an empty list.
    async fn load(&self, conversation_id: &str) -> HistoryResult<Vec<ConversationTurn>>;

    /// Append one turn and refresh the conversation's expiry.
    async fn append(
        &self,
        conversation_id: &str,
        turn: &ConversationTurn,
        ttl: Duration,
    ) -> HistoryResult<()>;

    /// Backend name for logging.
    fn backend(&self) -> &'static str;
}

// ============================================================================
// In-Memory History
// ============================================================================

#[derive(Debug)]
struct StoredConversation {
    turns: Vec<ConversationTurn>,
    expires_at: Instant,
}

/// In-process history store for local development and testing.
///
/// Expired conversations are swept on every append, and an expired
/// conversation that is read first is dropped by that read.
#[derive(Debug, Default)]
pub struct InMemoryHistory {
    conversations: RwLock<HashMap<String, StoredConversation>>,
}

impl InMemoryHistory {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of conversations currently held, expired ones included.
    pub async fn len(&self) -> usize {
        self.conversations.read().await.len()
    }

    /// Whether the store holds no conversations.
    pub async fn is_empty(&self) -> bool {
        self.conversations.read().await.is_empty()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistory {
    async fn load(&self, conversation_id: &str) -> HistoryResult<Vec<ConversationTurn>> {
        let mut conversations = self.conversations.write().await;
        match conversations.get(conversation_id) {
            Some(stored) if stored.expires_at > Instant::now() => Ok(stored.turns.clone()),
            Some(_) => {
                conversations.remove(conversation_id);
                Ok(Vec::new())
            }
            None => Ok(Vec::new()),
        }
    }

    async fn append(
        &self,
        conversation_id: &str,
        turn: &ConversationTurn,
        ttl: Duration,
    ) -> HistoryResult<()> {
        let now = Instant::now();
        let mut conversations = self.conversations.write().await;
        conversations.retain(|_, c| c.expires_at > now);

        let stored = conversations
            .entry(conversation_id.to_string())
            .or_insert_with(|| StoredConversation {
                turns: Vec::new(),
                expires_at: now,
            });

        stored.turns.push(turn.clone());
        stored.expires_at = now + ttl;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

// ============================================================================
// Redis History (Feature-gated)
// ============================================================================

/// Build the Redis key of a conversation.
pub fn conversation_key(prefix: &str, conversation_id: &str) -> String {
    format!("{prefix}{conversation_id}")
}

/// Redis list-backed history store.
///
/// Uses `RPUSH` + `EXPIRE` in one atomic pipeline for appends and
/// `LRANGE 0 -1` for reads. The connection is opened on first use, so an
/// unreachable server shows up as per-call `HistoryError::Connection`.
#[cfg(feature = "redis-backend")]
pub struct RedisHistory {
    client: redis::Client,
    /// Connection manager (handles reconnection automatically once up).
    conn: tokio::sync::OnceCell<redis::aio::ConnectionManager>,
    key_prefix: String,
    connect_timeout: Duration,
}

#[cfg(feature = "redis-backend")]
impl RedisHistory {
    /// Create a store for `url` without connecting yet.
    pub fn new(
        url: &str,
        key_prefix: impl Into<String>,
        connect_timeout: Duration,
    ) -> HistoryResult<Self> {
        let client =
            redis::Client::open(url).map_err(|e| HistoryError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            conn: tokio::sync::OnceCell::new(),
            key_prefix: key_prefix.into(),
            connect_timeout,
        })
    }

    async fn connection(&self) -> HistoryResult<redis::aio::ConnectionManager> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                let connect = self.client.get_connection_manager();
                match tokio::time::timeout(self.connect_timeout, connect).await {
                    Ok(Ok(conn)) => {
                        tracing::info!(backend = "redis", "History store connected");
                        Ok(conn)
                    }
                    Ok(Err(e)) => Err(HistoryError::Connection(e.to_string())),
                    Err(_) => Err(HistoryError::Connection(format!(
                        "connect timed out after {:?}",
                        self.connect_timeout
                    ))),
                }
            })
            .await?;
        Ok(conn.clone())
    }
}

#[cfg(feature = "redis-backend")]
#[async_trait]
impl HistoryStore for RedisHistory {
    async fn load(&self, conversation_id: &str) -> HistoryResult<Vec<ConversationTurn>> {
        let key = conversation_key(&self.key_prefix, conversation_id);
        let mut conn = self.connection().await?;

        let raw: Vec<String> = redis::cmd("LRANGE")
            .arg(&key)
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await
            .map_err(|e| HistoryError::Command(e.to_string()))?;

        let turns = raw
            .iter()
            .filter_map(|item| match serde_json::from_str::<ConversationTurn>(item) {
                Ok(turn) => Some(turn),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Skipping unreadable history entry");
                    None
                }
            })
            .collect();

        Ok(turns)
    }

    async fn append(
        &self,
        conversation_id: &str,
        turn: &ConversationTurn,
        ttl: Duration,
    ) -> HistoryResult<()> {
        let key = conversation_key(&self.key_prefix, conversation_id);
        let payload =
            serde_json::to_string(turn).map_err(|e| HistoryError::Serialization(e.to_string()))?;
        let ttl_secs = i64::try_from(ttl.as_secs().max(1)).unwrap_or(i64::MAX);
        let mut conn = self.connection().await?;

        redis::pipe()
            .atomic()
            .cmd("RPUSH")
            .arg(&key)
            .arg(&payload)
            .ignore()
            .cmd("EXPIRE")
            .arg(&key)
            .arg(ttl_secs)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| HistoryError::Command(e.to_string()))?;

        tracing::debug!(key = %key, role = turn.role.as_str(), "Turn appended to Redis");
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

// ============================================================================
// Store Factory
// ============================================================================

/// Create the history store selected by configuration.
///
/// A configured Redis URL selects the Redis backend; otherwise conversations
/// are kept in process memory. Only a malformed URL fails here.
pub fn create_history_store(config: &HistoryConfig) -> HistoryResult<Arc<dyn HistoryStore>> {
    match config.redis_url.as_deref() {
        None => Ok(Arc::new(InMemoryHistory::new())),
        Some(url) => {
            #[cfg(feature = "redis-backend")]
            {
                let store = RedisHistory::new(
                    url,
                    config.key_prefix.clone(),
                    Duration::from_secs(config.timeout_secs),
                )?;
                Ok(Arc::new(store))
            }
            #[cfg(not(feature = "redis-backend"))]
            {
                tracing::warn!(
                    url = %url,
                    "Redis backend feature not enabled. Falling back to in-memory history."
                );
                Ok(Arc::new(InMemoryHistory::new()))
            }
        }
    }
}
