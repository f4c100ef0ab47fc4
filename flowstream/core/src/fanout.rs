//! Fan-out Writer
//!
//! Delivers one chunk to many sinks. Every sink is attempted exactly once per
//! call; a failure on one sink never prevents delivery to the others.
//!
//! # Design
//!
//! ```text
//!                     write_all(chunk, sinks)
//!                              │
//!          ┌───────────────────┼───────────────────┐
//!          │                   │                   │
//!    can_accept? ✓       can_accept? ✗       can_accept? ✓
//!          │                   │                   │
//!     spawn write        IncompatibleSink     spawn write
//!          │                                       │
//!          └─────────────── join_all ──────────────┘
//!                              │
//!                  Vec<Result> in sink order
//! ```
//!
//! Accepted writes run as independent tokio tasks, so they proceed
//! concurrently and in no particular order between sinks. `write_all` returns
//! once every sink has accepted or rejected its write request; it does not
//! wait for sinks to drain.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::join_all;

use crate::error::{StreamError, StreamResult};
use crate::payload::Chunk;
use crate::sink::Sink;

/// Summary of a fan-out call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutReport {
    /// Number of sinks that accepted the chunk
    pub successful: usize,
    /// Number of sinks that rejected or failed
    pub failed: usize,
    /// Positions (in the sink slice) of the sinks that failed
    pub failed_indices: Vec<usize>,
}

impl FanoutReport {
    /// Summarize a `write_all` result vector
    #[must_use]
    pub fn from_results(results: &[StreamResult<()>]) -> Self {
        let failed_indices: Vec<usize> = results
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_err())
            .map(|(i, _)| i)
            .collect();

        Self {
            successful: results.len() - failed_indices.len(),
            failed: failed_indices.len(),
            failed_indices,
        }
    }

    /// Check if every sink received the chunk
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    /// Check if no sink received the chunk
    #[must_use]
    pub fn all_failed(&self) -> bool {
        self.successful == 0
    }
}

/// Lifetime counters for a writer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutStats {
    /// `write_all` calls
    pub calls: u64,
    /// Writes handed to sinks
    pub writes: u64,
    /// Sinks that failed the capability check
    pub incompatible: u64,
    /// Accepted writes that then failed
    pub failed: u64,
}

/// Delivers chunks to sets of sinks
#[derive(Debug, Default)]
pub struct FanoutWriter {
    calls: AtomicU64,
    writes: AtomicU64,
    incompatible: AtomicU64,
    failed: AtomicU64,
}

impl FanoutWriter {
    /// Create a writer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lifetime counters
    #[must_use]
    pub fn stats(&self) -> FanoutStats {
        FanoutStats {
            calls: self.calls.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            incompatible: self.incompatible.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    /// Write `chunk` to every sink
    ///
    /// Returns one result per sink, in the same order as `sinks`:
    /// - `Ok(())` if the sink accepted the write request
    /// - [`StreamError::IncompatibleSink`] if its capability check failed
    /// - the sink's own error (or [`StreamError::SinkFailed`] if its write
    ///   task panicked) otherwise
    ///
    /// Must be called from within a tokio runtime.
    pub async fn write_all(&self, chunk: &Chunk, sinks: &[Arc<dyn Sink>]) -> Vec<StreamResult<()>> {
        self.calls.fetch_add(1, Ordering::Relaxed);

        let attempts = sinks.iter().map(|sink| {
            let sink = Arc::clone(sink);
            let chunk = chunk.clone();

            async move {
                if !sink.can_accept() {
                    self.incompatible.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(sink = %sink.label(), "Sink failed capability check");
                    return Err(StreamError::IncompatibleSink { sink: sink.label() });
                }

                self.writes.fetch_add(1, Ordering::Relaxed);
                let label = sink.label();
                let outcome = match tokio::spawn(async move { sink.write(chunk).await }).await {
                    Ok(result) => result,
                    Err(e) => Err(StreamError::SinkFailed {
                        message: format!("{label}: write task failed: {e}"),
                    }),
                };

                if let Err(e) = &outcome {
                    self.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(sink = %label, error = %e, "Sink write failed");
                }
                outcome
            }
        });

        let results = join_all(attempts).await;

        tracing::debug!(
            sinks = sinks.len(),
            failed = results.iter().filter(|r| r.is_err()).count(),
            "Fan-out complete"
        );
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{ChannelSink, MemorySink};
    use async_trait::async_trait;
    use bytes::Bytes;
    use pretty_assertions::assert_eq;

    struct FailingSink;

    #[async_trait]
    impl Sink for FailingSink {
        fn label(&self) -> String {
            "failing".to_string()
        }

        fn can_accept(&self) -> bool {
            true
        }

        async fn write(&self, _chunk: Chunk) -> StreamResult<()> {
            Err(StreamError::SinkFailed {
                message: "disk full".to_string(),
            })
        }
    }

    struct PanickingSink;

    #[async_trait]
    impl Sink for PanickingSink {
        fn label(&self) -> String {
            "panicking".to_string()
        }

        fn can_accept(&self) -> bool {
            true
        }

        async fn write(&self, _chunk: Chunk) -> StreamResult<()> {
            panic!("sink exploded");
        }
    }

    fn chunk() -> Chunk {
        Chunk::Bytes(Bytes::from_static(b"payload"))
    }

    #[tokio::test]
    async fn test_write_all_every_sink() {
        let a = Arc::new(MemorySink::new("a"));
        let b = Arc::new(MemorySink::new("b"));
        let sinks: Vec<Arc<dyn Sink>> = vec![a.clone(), b.clone()];

        let writer = FanoutWriter::new();
        let results = writer.write_all(&chunk(), &sinks).await;

        assert!(results.iter().all(Result::is_ok));
        assert_eq!(a.chunks(), vec![chunk()]);
        assert_eq!(b.chunks(), vec![chunk()]);
    }

    #[tokio::test]
    async fn test_incompatible_sink_does_not_block_others() {
        let good = Arc::new(MemorySink::new("good"));
        let bad = Arc::new(MemorySink::rejecting("bad"));
        let sinks: Vec<Arc<dyn Sink>> = vec![good.clone(), bad.clone()];

        let writer = FanoutWriter::new();
        let results = writer.write_all(&chunk(), &sinks).await;

        assert_eq!(
            results,
            vec![
                Ok(()),
                Err(StreamError::IncompatibleSink {
                    sink: "bad".to_string()
                })
            ]
        );
        assert_eq!(good.len(), 1);
        assert!(bad.is_empty());
    }

    #[tokio::test]
    async fn test_failed_and_panicking_sinks_are_isolated() {
        let before = Arc::new(MemorySink::new("before"));
        let after = Arc::new(MemorySink::new("after"));
        let sinks: Vec<Arc<dyn Sink>> = vec![
            before.clone(),
            Arc::new(FailingSink),
            Arc::new(PanickingSink),
            after.clone(),
        ];

        let writer = FanoutWriter::new();
        let results = writer.write_all(&chunk(), &sinks).await;
        let report = FanoutReport::from_results(&results);

        assert_eq!(report.successful, 2);
        assert_eq!(report.failed_indices, vec![1, 2]);
        assert!(matches!(&results[2], Err(StreamError::SinkFailed { message }) if message.contains("panicking")));
        assert_eq!(before.len(), 1);
        assert_eq!(after.len(), 1);

        let stats = writer.stats();
        assert_eq!(stats.calls, 1);
        assert_eq!(stats.writes, 4);
        assert_eq!(stats.failed, 2);
    }

    #[tokio::test]
    async fn test_write_all_no_sinks() {
        let writer = FanoutWriter::new();
        let results = writer.write_all(&chunk(), &[]).await;
        assert!(results.is_empty());
        assert!(FanoutReport::from_results(&results).all_succeeded());
    }

    #[tokio::test]
    async fn test_write_all_with_channel_sinks() {
        let (open, mut open_rx) = ChannelSink::new("open", 2);
        let (closed, closed_rx) = ChannelSink::new("closed", 2);
        drop(closed_rx);
        let sinks: Vec<Arc<dyn Sink>> = vec![Arc::new(open), Arc::new(closed)];

        let writer = FanoutWriter::new();
        let report = FanoutReport::from_results(&writer.write_all(&chunk(), &sinks).await);

        assert_eq!(report.successful, 1);
        assert_eq!(report.failed_indices, vec![1]);
        assert_eq!(open_rx.recv().await, Some(chunk()));
        assert_eq!(writer.stats().incompatible, 1);
    }
}
