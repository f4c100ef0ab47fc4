//! Pump Loop
//!
//! Reads an opaque byte source, cuts it into chunks the gate will admit,
//! pushes each chunk into a [`StreamCore`] and fans it out to the configured
//! sinks:
//!
//! ```text
//!   reader ──read(max_raw_read)──▶ pending ──fitting_prefix──▶ StreamCore ──▶ sinks
//!      ▲                                                           │
//!      └──────────────── pause / resume ◀──── sink ready() ◀───────┘
//! ```
//!
//! Bytes that would split an encoding unit (half of a UTF-8 character, a
//! partial base64 group) stay pending until the next read. When a sink is
//! full the pump pauses the stream and waits for room before pushing again,
//! so the byte source is never read faster than the slowest sink drains.
//! End of input ends the stream; nothing here exits the process.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, warn};

use flowstream_core::{
    callback, ChannelSink, EventKind, FanoutReport, FanoutWriter, Payload, Sink, StreamCore,
    StreamEvent,
};

/// Totals for one pump run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PumpSummary {
    /// Chunks pushed into the stream
    pub chunks: u64,
    /// Bytes read from the source
    pub bytes_read: u64,
    /// Sink writes that failed or were refused
    pub sink_failures: u64,
    /// Times the pump paused for a full sink
    pub pauses: u64,
}

/// Longest encoding unit the pump may hold back between reads
const MAX_HELD_BACK: usize = 3;

/// Drives one stream from a reader into a set of channel sinks
pub struct Pump {
    stream: StreamCore,
    sinks: Vec<ChannelSink>,
    writer: FanoutWriter,
}

impl Pump {
    /// Create a pump over an existing stream
    ///
    /// Registers `close` and `error` listeners that log through `tracing`.
    /// Fails when the high-water mark is too small for any chunk of the
    /// configured encoding to be admitted.
    pub fn new(mut stream: StreamCore, sinks: Vec<ChannelSink>) -> Result<Self> {
        if stream.gate().max_raw_read() == 0 {
            let config = stream.config();
            bail!(
                "High-water mark of {} bytes cannot hold any {} chunk",
                config.high_water_mark,
                config.encoding
            );
        }

        stream.listen(
            EventKind::Close,
            callback(|event| {
                if let StreamEvent::Close(notice) = event {
                    info!(errno = notice.errno, message = %notice.message, "Stream close notice");
                }
                Ok(())
            }),
        )?;
        stream.listen(
            EventKind::Error,
            callback(|event| {
                if let StreamEvent::Error(message) = event {
                    warn!(error = %message, "Stream error");
                }
                Ok(())
            }),
        )?;
        stream.on_destroy(|notice| {
            debug!(errno = notice.errno, message = %notice.message, "Stream destroy notice");
        })?;

        Ok(Self {
            stream,
            sinks,
            writer: FanoutWriter::new(),
        })
    }

    /// The stream being pumped
    #[must_use]
    pub fn stream(&self) -> &StreamCore {
        &self.stream
    }

    /// Pump until the reader is exhausted
    ///
    /// Ends (and, when permitted, destroys) the stream at end of input. Read
    /// and stream errors abort the run; individual sink failures are counted
    /// and logged but do not.
    pub async fn run<R>(&mut self, mut reader: R) -> Result<PumpSummary>
    where
        R: AsyncRead + Unpin,
    {
        let mut summary = PumpSummary::default();
        let mut buf = vec![0u8; self.stream.gate().max_raw_read()];
        let mut pending: Vec<u8> = Vec::with_capacity(buf.len() + MAX_HELD_BACK);
        let dyn_sinks: Vec<Arc<dyn Sink>> = self
            .sinks
            .iter()
            .map(|sink| Arc::new(sink.clone()) as Arc<dyn Sink>)
            .collect();

        info!(
            read_size = buf.len(),
            sinks = dyn_sinks.len(),
            "Pump started"
        );

        loop {
            let n = reader.read(&mut buf).await.context("Failed to read input")?;
            let at_eof = n == 0;
            summary.bytes_read += n as u64;
            pending.extend_from_slice(&buf[..n]);

            while !pending.is_empty() {
                let take = self.stream.gate().fitting_prefix(&pending, at_eof);
                if take == 0 {
                    if at_eof || pending.len() > MAX_HELD_BACK {
                        // Nothing fits; let the gate report why
                        self.stream.push(std::mem::take(&mut pending))?;
                    }
                    break;
                }

                self.wait_for_sinks(&mut summary).await?;
                let chunk: Vec<u8> = pending.drain(..take).collect();
                self.stream.push(chunk)?;
                summary.chunks += 1;
                self.fan_out(&dyn_sinks, &mut summary).await?;
            }

            if at_eof {
                self.stream.push(Payload::End)?;
                break;
            }
        }

        if self.stream.config().auto_destroy {
            self.stream.destroy()?;
        }

        info!(
            chunks = summary.chunks,
            bytes = summary.bytes_read,
            sink_failures = summary.sink_failures,
            pauses = summary.pauses,
            "Pump finished"
        );
        Ok(summary)
    }

    /// Write the buffered chunk to every sink, counting failures
    async fn fan_out(&self, sinks: &[Arc<dyn Sink>], summary: &mut PumpSummary) -> Result<()> {
        let results = self.stream.write_buffered(&self.writer, sinks).await?;
        let report = FanoutReport::from_results(&results);
        if !report.all_succeeded() {
            summary.sink_failures += report.failed as u64;
            for (index, result) in results.iter().enumerate() {
                if let Err(e) = result {
                    warn!(sink = index, error = %e, "Chunk not delivered to sink");
                }
            }
        }
        Ok(())
    }

    /// Pause the stream while any live sink is full
    async fn wait_for_sinks(&mut self, summary: &mut PumpSummary) -> Result<()> {
        let full: Vec<&ChannelSink> = self
            .sinks
            .iter()
            .filter(|sink| sink.is_connected() && !sink.can_accept())
            .collect();
        if full.is_empty() {
            return Ok(());
        }

        summary.pauses += 1;
        self.stream.pause()?;
        for sink in full {
            if let Err(e) = sink.ready().await {
                // A sink that went away is reported by the next fan-out
                debug!(error = %e, "Sink closed while waiting");
            }
        }
        self.stream.resume()?;
        Ok(())
    }

    /// Release the sinks so writer tasks can finish
    pub fn into_sinks(self) -> Vec<ChannelSink> {
        self.sinks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowstream_core::{Chunk, Encoding, StreamConfig, StreamState};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    fn stream(hwm: usize) -> StreamCore {
        StreamCore::new(StreamConfig::new().with_high_water_mark(hwm)).unwrap()
    }

    async fn collect(mut rx: tokio::sync::mpsc::Receiver<Chunk>) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = rx.recv().await {
            out.extend_from_slice(&chunk.to_bytes());
        }
        out
    }

    #[tokio::test]
    async fn test_pump_chunks_input_by_high_water_mark() {
        let (sink, rx) = ChannelSink::new("out", 16);
        let mut pump = Pump::new(stream(4), vec![sink]).unwrap();

        let summary = pump.run(&b"hello world"[..]).await.unwrap();
        assert_eq!(summary.chunks, 3);
        assert_eq!(summary.bytes_read, 11);
        assert_eq!(summary.sink_failures, 0);
        assert_eq!(pump.stream().state(), StreamState::Destroyed);

        drop(pump);
        assert_eq!(collect(rx).await, b"hello world".to_vec());
    }

    #[tokio::test]
    async fn test_pump_fans_out_to_every_sink() {
        let (a, rx_a) = ChannelSink::new("a", 16);
        let (b, rx_b) = ChannelSink::new("b", 16);
        let mut pump = Pump::new(stream(3), vec![a, b]).unwrap();

        pump.run(&b"abcdefg"[..]).await.unwrap();
        drop(pump);

        assert_eq!(collect(rx_a).await, b"abcdefg".to_vec());
        assert_eq!(collect(rx_b).await, b"abcdefg".to_vec());
    }

    fn count_events(stream: &mut StreamCore, kind: EventKind) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        stream
            .listen(
                kind,
                callback(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .unwrap();
        count
    }

    #[tokio::test]
    async fn test_pump_pauses_until_full_sink_drains() {
        let (sink, mut rx) = ChannelSink::new("slow", 1);
        let release = Arc::new(Notify::new());

        // The consumer stays idle until the stream pauses, so the channel
        // is guaranteed to fill up first
        let consumer = {
            let release = Arc::clone(&release);
            tokio::spawn(async move {
                release.notified().await;
                let mut out = Vec::new();
                while let Some(chunk) = rx.recv().await {
                    out.extend_from_slice(&chunk.to_bytes());
                }
                out
            })
        };

        let mut core = stream(2);
        let pauses = count_events(&mut core, EventKind::Pause);
        let resumes = count_events(&mut core, EventKind::Resume);
        {
            let release = Arc::clone(&release);
            core.listen(
                EventKind::Pause,
                callback(move |_| {
                    release.notify_one();
                    Ok(())
                }),
            )
            .unwrap();
        }

        let mut pump = Pump::new(core, vec![sink]).unwrap();
        let summary = pump.run(&b"0123456789"[..]).await.unwrap();
        drop(pump);

        assert_eq!(summary.sink_failures, 0);
        assert!(summary.pauses > 0);
        assert_eq!(pauses.load(Ordering::SeqCst) as u64, summary.pauses);
        assert_eq!(resumes.load(Ordering::SeqCst) as u64, summary.pauses);
        assert_eq!(consumer.await.unwrap(), b"0123456789".to_vec());
    }

    #[tokio::test]
    async fn test_pump_keeps_utf8_split_across_reads() {
        let (sink, mut rx) = ChannelSink::new("text", 16);
        let config = StreamConfig::text().with_high_water_mark(4);
        let mut pump = Pump::new(StreamCore::new(config).unwrap(), vec![sink]).unwrap();

        let input = "abcé ünï ✓😀!".as_bytes();
        let summary = pump.run(input).await.unwrap();
        drop(pump);

        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk.as_str().unwrap_or_default().to_string());
        }
        assert_eq!(summary.bytes_read, input.len() as u64);
        assert_eq!(chunks.concat(), "abcé ünï ✓😀!");
        assert!(chunks.iter().all(|c| !c.is_empty() && c.len() <= 4));
        assert!(!chunks.concat().contains('\u{FFFD}'));
    }

    #[tokio::test]
    async fn test_pump_replaces_dangling_utf8_at_end() {
        let (sink, mut rx) = ChannelSink::new("text", 16);
        let config = StreamConfig::text().with_high_water_mark(4);
        let mut pump = Pump::new(StreamCore::new(config).unwrap(), vec![sink]).unwrap();

        pump.run(&[b'a', b'b', 0xC3][..]).await.unwrap();
        drop(pump);

        let mut text = String::new();
        while let Some(chunk) = rx.recv().await {
            text.push_str(chunk.as_str().unwrap_or_default());
        }
        assert_eq!(text, "ab\u{FFFD}");
    }

    #[tokio::test]
    async fn test_pump_base64_groups_stay_whole() {
        let (sink, mut rx) = ChannelSink::new("b64", 16);
        let config = StreamConfig::new()
            .with_high_water_mark(8)
            .with_encoding(Encoding::Base64);
        let mut pump = Pump::new(StreamCore::new(config).unwrap(), vec![sink]).unwrap();

        pump.run(&b"hello world"[..]).await.unwrap();
        drop(pump);

        let mut encoded = String::new();
        while let Some(chunk) = rx.recv().await {
            encoded.push_str(chunk.as_str().unwrap_or_default());
        }
        assert_eq!(encoded, "aGVsbG8gd29ybGQ=");
    }

    #[test]
    fn test_pump_rejects_high_water_mark_that_fits_nothing() {
        for hwm in 1..=3 {
            let config = StreamConfig::new()
                .with_high_water_mark(hwm)
                .with_encoding(Encoding::Base64);
            let (sink, _rx) = ChannelSink::new("out", 1);
            let err = Pump::new(StreamCore::new(config).unwrap(), vec![sink])
                .err()
                .unwrap();
            assert!(err.to_string().contains("cannot hold any base64 chunk"));
        }

        let config = StreamConfig::new()
            .with_high_water_mark(1)
            .with_encoding(Encoding::Uint16);
        let (sink, _rx) = ChannelSink::new("out", 1);
        assert!(Pump::new(StreamCore::new(config).unwrap(), vec![sink]).is_err());

        let config = StreamConfig::new()
            .with_high_water_mark(4)
            .with_encoding(Encoding::Base64);
        let (sink, _rx) = ChannelSink::new("out", 1);
        assert!(Pump::new(StreamCore::new(config).unwrap(), vec![sink]).is_ok());
    }

    #[tokio::test]
    async fn test_pump_fails_when_input_cannot_fit() {
        let (sink, _rx) = ChannelSink::new("text", 16);
        // A four-byte character can never fit in three bytes
        let config = StreamConfig::text().with_high_water_mark(3);
        let mut pump = Pump::new(StreamCore::new(config).unwrap(), vec![sink]).unwrap();

        let err = pump.run("😀".as_bytes()).await.unwrap_err();
        assert!(err.to_string().contains("Payload too large"));
    }

    #[tokio::test]
    async fn test_pump_counts_dead_sink() {
        let (live, rx_live) = ChannelSink::new("live", 16);
        let (dead, rx_dead) = ChannelSink::new("dead", 16);
        drop(rx_dead);

        let mut pump = Pump::new(stream(8), vec![live, dead]).unwrap();
        let summary = pump.run(&b"data"[..]).await.unwrap();
        drop(pump);

        assert_eq!(summary.sink_failures, 1);
        assert_eq!(collect(rx_live).await, b"data".to_vec());
    }

    #[tokio::test]
    async fn test_pump_empty_input_still_closes() {
        let (sink, rx) = ChannelSink::new("out", 4);
        let config = StreamConfig::new()
            .with_emit_close(false)
            .with_auto_destroy(false);
        let mut pump = Pump::new(StreamCore::new(config).unwrap(), vec![sink]).unwrap();

        let summary = pump.run(&b""[..]).await.unwrap();
        assert_eq!(summary.chunks, 0);
        assert_eq!(pump.stream().state(), StreamState::Closed);

        drop(pump);
        assert!(collect(rx).await.is_empty());
    }
}
