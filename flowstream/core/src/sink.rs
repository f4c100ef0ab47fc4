//! Sinks
//!
//! Downstream consumers for fan-out. The core only ever calls
//! [`Sink::can_accept`] and [`Sink::write`]; how a sink moves bytes is its own
//! business.
//!
//! A write is a *request*: it should hand the chunk off (queue it, copy it)
//! and return without waiting for the data to drain. [`ChannelSink`] does this
//! with a bounded tokio channel and an optional writer task.

use std::fmt;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{StreamError, StreamResult};
use crate::payload::Chunk;

/// A downstream consumer of chunks
#[async_trait]
pub trait Sink: Send + Sync {
    /// Short label used in errors and logs
    fn label(&self) -> String;

    /// Whether the sink can take a write right now
    fn can_accept(&self) -> bool;

    /// Hand a chunk to the sink
    async fn write(&self, chunk: Chunk) -> StreamResult<()>;
}

// ============================================================================
// Channel Sink
// ============================================================================

/// Sink backed by a bounded tokio channel
///
/// Accepts while the receiver is alive and the channel has room. Writes use
/// `try_send`, so a write never waits on a slow consumer.
#[derive(Clone)]
pub struct ChannelSink {
    label: String,
    tx: mpsc::Sender<Chunk>,
}

impl ChannelSink {
    /// Create a sink and the receiver its chunks arrive on
    #[must_use]
    pub fn new(label: impl Into<String>, capacity: usize) -> (Self, mpsc::Receiver<Chunk>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                label: label.into(),
                tx,
            },
            rx,
        )
    }

    /// Create a sink whose chunks are written to `writer` by a spawned task
    ///
    /// The task ends when every clone of the sink is dropped, flushing the
    /// writer first. It resolves to the number of bytes written.
    pub fn spawn_writer<W>(
        label: impl Into<String>,
        capacity: usize,
        mut writer: W,
    ) -> (Self, JoinHandle<std::io::Result<u64>>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, mut rx) = Self::new(label, capacity);
        let label = sink.label.clone();

        let handle = tokio::spawn(async move {
            let mut written = 0u64;
            while let Some(chunk) = rx.recv().await {
                let bytes = chunk.to_bytes();
                if let Err(e) = writer.write_all(&bytes).await {
                    tracing::warn!(sink = %label, error = %e, "Sink writer failed");
                    return Err(e);
                }
                written += bytes.len() as u64;
            }
            writer.flush().await?;
            tracing::debug!(sink = %label, bytes = written, "Sink writer finished");
            Ok(written)
        });

        (sink, handle)
    }

    /// Check if the receiving side is still open
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Wait until the channel has room for one more chunk
    ///
    /// With a single producer the slot stays free until its next write, so a
    /// producer can call this before pushing to turn a full sink into
    /// backpressure instead of an incompatible-sink error.
    pub async fn ready(&self) -> StreamResult<()> {
        self.tx
            .reserve()
            .await
            .map(drop)
            .map_err(|_| StreamError::SinkFailed {
                message: format!("{}: receiver closed", self.label),
            })
    }
}

impl fmt::Debug for ChannelSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelSink")
            .field("label", &self.label)
            .field("capacity", &self.tx.capacity())
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[async_trait]
impl Sink for ChannelSink {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn can_accept(&self) -> bool {
        self.is_connected() && self.tx.capacity() > 0
    }

    async fn write(&self, chunk: Chunk) -> StreamResult<()> {
        self.tx
            .try_send(chunk)
            .map_err(|e| StreamError::SinkFailed {
                message: format!("{}: {e}", self.label),
            })
    }
}

// ============================================================================
// Memory Sink
// ============================================================================

/// Sink that keeps every chunk in memory
///
/// Useful for tests and for collecting output. Acceptance can be switched
/// off to simulate an incompatible sink.
#[derive(Debug)]
pub struct MemorySink {
    label: String,
    accepting: Mutex<bool>,
    chunks: Mutex<Vec<Chunk>>,
}

impl MemorySink {
    /// Create an accepting sink
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            accepting: Mutex::new(true),
            chunks: Mutex::new(Vec::new()),
        }
    }

    /// Create a sink that fails every capability check
    #[must_use]
    pub fn rejecting(label: impl Into<String>) -> Self {
        let sink = Self::new(label);
        sink.set_accepting(false);
        sink
    }

    /// Switch acceptance on or off
    pub fn set_accepting(&self, accepting: bool) {
        *self.accepting.lock() = accepting;
    }

    /// Chunks received so far
    #[must_use]
    pub fn chunks(&self) -> Vec<Chunk> {
        self.chunks.lock().clone()
    }

    /// Number of chunks received
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.lock().len()
    }

    /// Whether nothing has been written
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.lock().is_empty()
    }
}

#[async_trait]
impl Sink for MemorySink {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn can_accept(&self) -> bool {
        *self.accepting.lock()
    }

    async fn write(&self, chunk: Chunk) -> StreamResult<()> {
        self.chunks.lock().push(chunk);
        Ok(())
    }
}
