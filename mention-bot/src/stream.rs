//! Rate-limited streaming of a growing answer into one message.
//!
//! A [`StreamingSession`] owns the text accumulated so far and decides, per
//! fragment, whether the placeholder message should be edited now. Edits are
//! paced by an [`UpdateScheduler`] whose minimum interval doubles as a
//! conversation produces more edits, keeping long answers well below the
//! chat platform's edit rate limits.
//!
//! ```text
//! fragment ─► TokenBuffer ─► UpdateScheduler ──emit?──► MessageSink::emit_interim
//!                                                  end ─► MessageSink::emit_final
//! ```

use crate::error::BridgeError;
use crate::message::MessageTarget;
use crate::traits::{ChannelResult, MessageSink};
use std::time::Duration;
use tokio::time::Instant;

// ============================================================================
// Token Buffer
// ============================================================================

/// Append-only buffer of streamed fragments.
#[derive(Debug, Default, Clone)]
pub struct TokenBuffer {
    text: String,
}

impl TokenBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, fragment: &str) {
        self.text.push_str(fragment);
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

// ============================================================================
// Update Scheduler
// ============================================================================

/// Number of emits per second of interval before the interval doubles.
const EMITS_PER_BACKOFF_SECOND: f64 = 10.0;

/// Decides when an interim edit is due.
///
/// An emit is due once strictly more than `min_interval` has passed since the
/// previous emit (or since the session started). After each emit the interval
/// doubles whenever `emit_count / 10` exceeds the interval in seconds.
#[derive(Debug, Clone)]
pub struct UpdateScheduler {
    min_interval: Duration,
    last_emit: Instant,
    emit_count: u32,
}

impl UpdateScheduler {
    pub fn new(min_interval: Duration, started_at: Instant) -> Self {
        Self {
            min_interval,
            last_emit: started_at,
            emit_count: 0,
        }
    }

    /// Record a fragment arriving at `now`; returns whether to emit.
    pub fn should_emit(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.last_emit) <= self.min_interval {
            return false;
        }

        self.last_emit = now;
        self.emit_count += 1;

        if f64::from(self.emit_count) / EMITS_PER_BACKOFF_SECOND > self.min_interval.as_secs_f64()
        {
            self.min_interval *= 2;
            tracing::debug!(
                emit_count = self.emit_count,
                min_interval_ms = self.min_interval.as_millis() as u64,
                "Backing off interim edits"
            );
        }
        true
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn emit_count(&self) -> u32 {
        self.emit_count
    }
}

// ============================================================================
// Streaming Session
// ============================================================================

/// Result of a completed session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    /// Full final text.
    pub text: String,
    /// Interim edits attempted (successful or not).
    pub interim_edits: u32,
    /// Interim edits the sink rejected.
    pub failed_edits: u32,
}

/// One answer being streamed into one message.
///
/// Owned by a single task. `finish` consumes the session, so the terminal
/// edit happens exactly once.
pub struct StreamingSession<'a> {
    sink: &'a dyn MessageSink,
    target: MessageTarget,
    buffer: TokenBuffer,
    scheduler: UpdateScheduler,
    failed_edits: u32,
}

impl<'a> StreamingSession<'a> {
    /// Start a session at the current instant.
    pub fn new(sink: &'a dyn MessageSink, target: MessageTarget, min_interval: Duration) -> Self {
        Self::started_at(sink, target, min_interval, Instant::now())
    }

    /// Start a session at an explicit instant.
    pub fn started_at(
        sink: &'a dyn MessageSink,
        target: MessageTarget,
        min_interval: Duration,
        started_at: Instant,
    ) -> Self {
        Self {
            sink,
            target,
            buffer: TokenBuffer::new(),
            scheduler: UpdateScheduler::new(min_interval, started_at),
            failed_edits: 0,
        }
    }

    /// Add a fragment received now.
    pub async fn push(&mut self, fragment: &str) {
        self.push_at(fragment, Instant::now()).await;
    }

    /// Add a fragment received at `now`, editing the message when due.
    ///
    /// A failed interim edit is logged and otherwise ignored; the next due
    /// edit carries the full text anyway.
    pub async fn push_at(&mut self, fragment: &str, now: Instant) {
        self.buffer.append(fragment);

        if !self.scheduler.should_emit(now) {
            return;
        }

        if let Err(e) = self.sink.emit_interim(&self.target, self.buffer.text()).await {
            self.failed_edits += 1;
            let err = BridgeError::InterimEdit(e);
            tracing::warn!(ts = %self.target.ts, kind = err.kind(), error = %err, "Skipping interim edit");
        }
    }

    /// Text accumulated so far.
    pub fn text(&self) -> &str {
        self.buffer.text()
    }

    /// Perform the terminal edit with the full text.
    pub async fn finish(self) -> ChannelResult<SessionSummary> {
        let text = self.buffer.into_text();
        self.sink.emit_final(&self.target, &text).await?;

        Ok(SessionSummary {
            text,
            interim_edits: self.scheduler.emit_count(),
            failed_edits: self.failed_edits,
        })
    }
}
