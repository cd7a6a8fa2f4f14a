//! Connection sink boundary.
//!
//! The coordinator never talks to a socket directly. Each connected agent
//! is represented by a [`ConnectionSink`]: an injected side-effect boundary
//! the hub writes outbound frames through. The production implementation
//! ([`MpscSink`]) feeds a bounded channel drained by a per-connection writer
//! task, so a slow consumer applies backpressure to delivery only, never
//! while a registry shard is locked. Tests substitute the same type and
//! read the receiving end directly.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// The peer's connection is gone; the frame was not delivered.
#[derive(Debug, Clone, Error)]
#[error("connection closed")]
pub struct SinkClosed;

/// Write side of one agent's persistent connection.
///
/// Implementations must be cheap to clone behind an `Arc` and safe to call
/// from any task. `send` may await on backpressure.
#[async_trait]
pub trait ConnectionSink: Send + Sync {
    /// Queue one UTF-8 frame for delivery to the remote agent.
    async fn send(&self, frame: String) -> Result<(), SinkClosed>;
}

/// Channel-backed sink used by the WebSocket server (and by tests).
pub struct MpscSink {
    tx: mpsc::Sender<String>,
}

impl MpscSink {
    /// Create a sink and the receiver its writer task (or test) drains.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ConnectionSink for MpscSink {
    async fn send(&self, frame: String) -> Result<(), SinkClosed> {
        self.tx.send(frame).await.map_err(|_| SinkClosed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
