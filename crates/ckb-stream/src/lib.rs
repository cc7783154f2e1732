// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! ckb-stream
//!
//! A streaming session accepts typed events over a bounded buffered
//! channel. The chunker accumulates items until an item-count or
//! byte-estimate threshold and then flushes; a dedicated heartbeat timer
//! sends keepalives non-blocking (dropped when the buffer is full).
//! `done` and `error` close the stream; sending afterwards is an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Typed events carried by a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamEvent {
    /// First event: what is being streamed.
    Meta {
        /// Tool producing the stream.
        tool: String,
        /// Expected item total, when known up front.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expected_items: Option<u64>,
    },
    /// A batch of items.
    Chunk {
        /// Monotonic chunk sequence number, starting at 0.
        seq: u64,
        /// The items.
        items: Vec<serde_json::Value>,
        /// Whether more chunks follow.
        has_more: bool,
    },
    /// Progress update.
    Progress {
        /// Percent complete in `[0, 100]`.
        percent: u8,
        /// Optional status line.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Advisory warning.
    Warning {
        /// The warning text.
        message: String,
    },
    /// Keepalive.
    Heartbeat {
        /// When the heartbeat was produced.
        at: DateTime<Utc>,
    },
    /// Terminal success event.
    Done {
        /// Total items streamed.
        total_items: u64,
    },
    /// Terminal failure event.
    Error {
        /// Stable error code.
        code: String,
        /// Failure detail.
        message: String,
    },
}

/// Errors from sending on a session.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StreamError {
    /// The stream was closed by `done` or `error`.
    #[error("stream is closed")]
    Closed,
    /// The receiving side went away.
    #[error("receiver dropped")]
    Disconnected,
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Stream tuning. Defaults follow the streaming contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Channel buffer depth.
    pub buffer: usize,
    /// Flush a chunk at this many items.
    pub max_chunk_items: usize,
    /// Flush a chunk at this many estimated bytes.
    pub max_chunk_bytes: usize,
    /// Heartbeat period in milliseconds.
    pub heartbeat_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            buffer: 32,
            max_chunk_items: 20,
            max_chunk_bytes: 16 * 1024,
            heartbeat_ms: 15_000,
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct SessionShared {
    tx: mpsc::Sender<StreamEvent>,
    closed: AtomicBool,
}

/// One streaming session. Created together with its receiver.
#[derive(Debug, Clone)]
pub struct StreamSession {
    shared: Arc<SessionShared>,
    seq: Arc<AtomicU64>,
}

impl StreamSession {
    /// Create a session and its event receiver. A heartbeat task starts
    /// immediately and stops when the session closes.
    #[must_use]
    pub fn new(config: &StreamConfig) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(config.buffer);
        let shared = Arc::new(SessionShared {
            tx,
            closed: AtomicBool::new(false),
        });

        let heartbeat = shared.clone();
        let period = Duration::from_millis(config.heartbeat_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // the immediate first tick is not a heartbeat
            loop {
                ticker.tick().await;
                if heartbeat.closed.load(Ordering::SeqCst) {
                    break;
                }
                // Heartbeats are non-blocking: a full buffer drops them.
                let _ = heartbeat.tx.try_send(StreamEvent::Heartbeat { at: Utc::now() });
            }
        });

        (
            Self {
                shared,
                seq: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Whether the stream has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    async fn send(&self, event: StreamEvent) -> Result<(), StreamError> {
        if self.is_closed() {
            return Err(StreamError::Closed);
        }
        self.shared
            .tx
            .send(event)
            .await
            .map_err(|_| StreamError::Disconnected)
    }

    /// Send the stream meta event.
    pub async fn meta(
        &self,
        tool: impl Into<String>,
        expected_items: Option<u64>,
    ) -> Result<(), StreamError> {
        self.send(StreamEvent::Meta {
            tool: tool.into(),
            expected_items,
        })
        .await
    }

    /// Send one chunk, assigning the next sequence number.
    pub async fn chunk(
        &self,
        items: Vec<serde_json::Value>,
        has_more: bool,
    ) -> Result<u64, StreamError> {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        self.send(StreamEvent::Chunk {
            seq,
            items,
            has_more,
        })
        .await?;
        Ok(seq)
    }

    /// Send a progress event.
    pub async fn progress(
        &self,
        percent: u8,
        message: Option<String>,
    ) -> Result<(), StreamError> {
        self.send(StreamEvent::Progress {
            percent: percent.min(100),
            message,
        })
        .await
    }

    /// Send a warning event.
    pub async fn warning(&self, message: impl Into<String>) -> Result<(), StreamError> {
        self.send(StreamEvent::Warning {
            message: message.into(),
        })
        .await
    }

    /// Terminal success: emits `done` and closes the stream.
    pub async fn done(&self, total_items: u64) -> Result<(), StreamError> {
        self.send(StreamEvent::Done { total_items }).await?;
        self.shared.closed.store(true, Ordering::SeqCst);
        debug!(target: "ckb.stream", total_items, "stream done");
        Ok(())
    }

    /// Terminal failure: emits `error` and closes the stream.
    pub async fn error(
        &self,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<(), StreamError> {
        self.send(StreamEvent::Error {
            code: code.into(),
            message: message.into(),
        })
        .await?;
        self.shared.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Chunker
// ---------------------------------------------------------------------------

/// Accumulates items and flushes bounded chunks through a session.
///
/// A flush happens when accepting another item would cross the item-count
/// or byte-estimate threshold, so the final chunk — flushed by
/// [`finish`](Chunker::finish) — is the only one with `has_more = false`.
pub struct Chunker {
    session: StreamSession,
    max_items: usize,
    max_bytes: usize,
    buffer: Vec<serde_json::Value>,
    buffered_bytes: usize,
    total: u64,
}

impl Chunker {
    /// Create a chunker over a session.
    #[must_use]
    pub fn new(session: StreamSession, config: &StreamConfig) -> Self {
        Self {
            session,
            max_items: config.max_chunk_items.max(1),
            max_bytes: config.max_chunk_bytes.max(1),
            buffer: Vec::new(),
            buffered_bytes: 0,
            total: 0,
        }
    }

    /// Add one item, flushing a full chunk first when needed.
    pub async fn push(&mut self, item: serde_json::Value) -> Result<(), StreamError> {
        let estimate = item.to_string().len();
        let would_overflow = self.buffer.len() >= self.max_items
            || (!self.buffer.is_empty() && self.buffered_bytes + estimate > self.max_bytes);
        if would_overflow {
            self.flush(true).await?;
        }
        self.buffered_bytes += estimate;
        self.buffer.push(item);
        self.total += 1;
        Ok(())
    }

    /// Flush the remainder with `has_more = false` and emit `done`.
    pub async fn finish(mut self) -> Result<u64, StreamError> {
        if !self.buffer.is_empty() {
            self.flush(false).await?;
        }
        let total = self.total;
        self.session.done(total).await?;
        Ok(total)
    }

    async fn flush(&mut self, has_more: bool) -> Result<(), StreamError> {
        let items = std::mem::take(&mut self.buffer);
        self.buffered_bytes = 0;
        self.session.chunk(items, has_more).await?;
        Ok(())
    }
}
