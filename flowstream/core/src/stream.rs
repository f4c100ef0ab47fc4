//! Stream Core
//!
//! [`StreamCore`] owns the configuration, the lifecycle state, the single
//! buffered chunk and the listener registry. It is driven by exactly one
//! producer: every mutating method takes `&mut self`, so concurrent pushes
//! have to be serialized by whoever owns the core.
//!
//! # Lifecycle
//!
//! ```text
//!   Idle ──push──▶ Flowing ◀──resume── Paused
//!                    │   ──pause──▶      │
//!                    │                   │
//!              push(End)            push(End)
//!                    ▼                   │
//!                 Ending ◀───────────────┘
//!                    │
//!                    ▼
//!                 Closed ──destroy (autoDestroy)──▶ Destroyed
//! ```
//!
//! `close()` may also be called directly from any live state. Once
//! `Destroyed`, every fallible operation fails with
//! [`StreamError::StreamDestroyed`].

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::config::StreamConfig;
use crate::error::{StreamError, StreamResult};
use crate::events::{EventKind, StreamEvent, StreamNotice};
use crate::fanout::FanoutWriter;
use crate::gate::BackpressureGate;
use crate::listener::{panic_message, Callback, DeliveryReport, ListenerId, ListenerRegistry};
use crate::payload::{Chunk, Payload};
use crate::sink::Sink;

// ============================================================================
// State
// ============================================================================

/// Lifecycle state of a stream
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamState {
    /// Created, nothing pushed yet
    #[default]
    Idle,
    /// At least one chunk pushed
    Flowing,
    /// Consumers asked to pause; pushes are still accepted
    Paused,
    /// End-of-data received, close in progress
    Ending,
    /// Closed; buffered data released
    Closed,
    /// Terminal
    Destroyed,
}

impl StreamState {
    /// Whether `push` is accepted in this state
    #[must_use]
    pub fn accepts_push(&self) -> bool {
        matches!(self, Self::Idle | Self::Flowing | Self::Paused)
    }

    /// Whether this is `Closed` or `Destroyed`
    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Closed | Self::Destroyed)
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Flowing => "flowing",
            Self::Paused => "paused",
            Self::Ending => "ending",
            Self::Closed => "closed",
            Self::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Counters for a single stream
#[derive(Clone, Debug)]
pub struct StreamStats {
    /// Chunks admitted
    pub chunks_pushed: u64,
    /// Bytes admitted (normalized size; object chunks count zero)
    pub bytes_pushed: u64,
    /// Payloads refused by the gate
    pub rejected: u64,
    /// Listener failures isolated during delivery
    pub listener_failures: u64,
    /// When the stream was created
    pub created_at: Instant,
    /// When the last chunk was admitted
    pub last_push_at: Option<Instant>,
}

impl Default for StreamStats {
    fn default() -> Self {
        Self {
            chunks_pushed: 0,
            bytes_pushed: 0,
            rejected: 0,
            listener_failures: 0,
            created_at: Instant::now(),
            last_push_at: None,
        }
    }
}

/// Hook invoked once when the stream is destroyed
///
/// Hooks run in registration order; a panicking hook is logged and counted
/// as a listener failure without stopping the rest.
pub type DestroyHook = Box<dyn FnOnce(&StreamNotice) + Send + Sync>;

// ============================================================================
// Stream Core
// ============================================================================

/// Single-producer push stream with ordered listeners
pub struct StreamCore {
    /// Admission control (also holds the configuration)
    gate: BackpressureGate,
    /// Current lifecycle state
    state: StreamState,
    /// The one pending chunk; replaced on every push, cleared on close
    buffered: Option<Chunk>,
    /// Listener sequences
    registry: ListenerRegistry,
    /// Counters
    stats: StreamStats,
    /// Destroy notifications, in registration order
    destroy_hooks: Vec<DestroyHook>,
}

impl StreamCore {
    /// Create a stream
    ///
    /// Zero thresholds are replaced by defaults. Fails with
    /// [`StreamError::ConflictingLifecycleConfig`] when `emit_close` is set
    /// without `auto_destroy`.
    pub fn new(config: StreamConfig) -> StreamResult<Self> {
        let config = config.normalized();
        if config.has_lifecycle_conflict() {
            tracing::warn!("Rejected stream config: emitClose without autoDestroy");
            return Err(StreamError::ConflictingLifecycleConfig);
        }

        tracing::debug!(
            high_water_mark = config.high_water_mark,
            encoding = %config.encoding,
            object_mode = config.object_mode,
            max_listeners = config.max_listeners,
            "Stream created"
        );

        Ok(Self {
            registry: ListenerRegistry::new(config.max_listeners),
            gate: BackpressureGate::new(config),
            state: StreamState::Idle,
            buffered: None,
            stats: StreamStats::default(),
            destroy_hooks: Vec::new(),
        })
    }

    /// Create a stream from a loosely-typed options object
    ///
    /// See [`StreamConfig::from_options`].
    pub fn from_options(options: &serde_json::Value) -> StreamResult<Self> {
        Self::new(StreamConfig::from_options(options))
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Effective configuration
    #[must_use]
    pub fn config(&self) -> &StreamConfig {
        self.gate.config()
    }

    /// Admission gate for this stream
    #[must_use]
    pub fn gate(&self) -> &BackpressureGate {
        &self.gate
    }

    /// Read-only view of the buffered chunk
    #[must_use]
    pub fn buffered(&self) -> Option<&Chunk> {
        self.buffered.as_ref()
    }

    /// Stream counters
    #[must_use]
    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    /// Number of listeners registered for `kind`
    #[must_use]
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.registry.listener_count(kind)
    }

    /// Event kinds with at least one listener
    #[must_use]
    pub fn event_names(&self) -> Vec<EventKind> {
        self.registry.event_names()
    }

    /// Whether the stream has been destroyed
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.state == StreamState::Destroyed
    }

    fn ensure_alive(&self) -> StreamResult<()> {
        if self.is_destroyed() {
            Err(StreamError::StreamDestroyed)
        } else {
            Ok(())
        }
    }

    fn ensure_open(&self) -> StreamResult<()> {
        self.ensure_alive()?;
        if self.state.accepts_push() {
            Ok(())
        } else {
            Err(StreamError::StreamClosed { state: self.state })
        }
    }

    fn transition(&mut self, next: StreamState) {
        if self.state != next {
            tracing::debug!(from = %self.state, to = %next, "Stream state transition");
            self.state = next;
        }
    }

    // ========================================================================
    // Listeners
    // ========================================================================

    /// Append a listener for `kind`
    pub fn listen(&mut self, kind: EventKind, callback: Callback) -> StreamResult<ListenerId> {
        self.ensure_alive()?;
        self.registry.listen(kind, callback)
    }

    /// Append a listener by event name
    pub fn listen_named(&mut self, name: &str, callback: Callback) -> StreamResult<ListenerId> {
        self.ensure_alive()?;
        self.registry.listen_named(name, callback)
    }

    /// Insert a listener at `index` in `kind`'s sequence
    pub fn insert_at(
        &mut self,
        kind: EventKind,
        callback: Callback,
        index: usize,
    ) -> StreamResult<ListenerId> {
        self.ensure_alive()?;
        self.registry.insert_at(kind, callback, index)
    }

    /// Remove listeners `[start, end)` from `kind`'s sequence
    pub fn remove_range(&mut self, kind: EventKind, start: usize, end: usize) -> StreamResult<()> {
        self.ensure_alive()?;
        self.registry.remove_range(kind, start, end)
    }

    /// Remove one listener by id; returns whether it was registered
    pub fn remove_listener(&mut self, kind: EventKind, id: ListenerId) -> StreamResult<bool> {
        self.ensure_alive()?;
        Ok(self.registry.remove_listener(kind, id))
    }

    /// Remove all listeners for `kind`, or every listener when `None`
    pub fn remove_all_listeners(&mut self, kind: Option<EventKind>) -> StreamResult<()> {
        self.ensure_alive()?;
        self.registry.remove_all_listeners(kind);
        Ok(())
    }

    /// Change the per-kind listener cap
    pub fn set_max_listeners(&mut self, max: usize) -> StreamResult<()> {
        self.ensure_alive()?;
        self.registry.set_max_listeners(max)
    }

    /// Register a destroy notification
    ///
    /// Hooks are appended and all run, in order, when the stream is
    /// destroyed.
    pub fn on_destroy<F>(&mut self, hook: F) -> StreamResult<()>
    where
        F: FnOnce(&StreamNotice) + Send + Sync + 'static,
    {
        self.ensure_alive()?;
        self.destroy_hooks.push(Box::new(hook));
        Ok(())
    }

    /// Deliver an owner-raised signal to its listeners
    ///
    /// Only `readable` and `error` may be emitted this way. Data, end, close,
    /// pause and resume come from the state machine and are refused with
    /// [`StreamError::ReservedEvent`].
    pub fn emit(&mut self, event: StreamEvent) -> StreamResult<DeliveryReport> {
        self.ensure_alive()?;
        match event.kind() {
            EventKind::Readable | EventKind::Error => Ok(self.deliver(&event)),
            kind => Err(StreamError::ReservedEvent { kind }),
        }
    }

    /// Deliver synchronously, reporting listener failures on `error`
    ///
    /// Failures of `error` listeners themselves are only counted and logged.
    fn deliver(&mut self, event: &StreamEvent) -> DeliveryReport {
        let report = self.registry.deliver(event);
        self.stats.listener_failures += report.failures.len() as u64;

        if event.kind() != EventKind::Error && self.registry.listener_count(EventKind::Error) > 0 {
            for failure in &report.failures {
                let error_report = self
                    .registry
                    .deliver(&StreamEvent::Error(failure.to_string()));
                self.stats.listener_failures += error_report.failures.len() as u64;
            }
        }

        report
    }

    // ========================================================================
    // Producer side
    // ========================================================================

    /// Push a payload, or end the stream with [`Payload::End`] / `None`
    ///
    /// The payload is checked by the gate before anything changes: on error
    /// the state and the buffered chunk are left untouched. On success the
    /// chunk replaces the buffered one, the state becomes `Flowing`, and
    /// `data` listeners have all run by the time this returns.
    pub fn push(&mut self, payload: impl Into<Payload>) -> StreamResult<()> {
        self.ensure_open()?;

        let payload = payload.into();
        if payload.is_end() {
            self.end();
            return Ok(());
        }

        let chunk = match self.gate.admit(payload) {
            Ok(chunk) => chunk,
            Err(e) => {
                self.stats.rejected += 1;
                tracing::warn!(error = %e, state = %self.state, "Payload rejected");
                return Err(e);
            }
        };

        self.stats.chunks_pushed += 1;
        self.stats.bytes_pushed += chunk.byte_len() as u64;
        self.stats.last_push_at = Some(Instant::now());
        self.buffered = Some(chunk.clone());
        self.transition(StreamState::Flowing);

        self.deliver(&StreamEvent::Data(chunk));
        Ok(())
    }

    /// End-of-data: emit `end`, then run the close sequence
    fn end(&mut self) {
        self.transition(StreamState::Ending);
        self.deliver(&StreamEvent::End);
        self.close(Some("end of data"));
    }

    /// Ask consumers to pause
    ///
    /// Advisory only: pushes are still accepted while paused.
    pub fn pause(&mut self) -> StreamResult<()> {
        self.ensure_open()?;
        if self.state != StreamState::Paused {
            self.transition(StreamState::Paused);
            self.deliver(&StreamEvent::Pause);
        }
        Ok(())
    }

    /// Ask consumers to resume
    pub fn resume(&mut self) -> StreamResult<()> {
        self.ensure_open()?;
        if self.state == StreamState::Paused {
            self.transition(StreamState::Flowing);
            self.deliver(&StreamEvent::Resume);
        }
        Ok(())
    }

    // ========================================================================
    // Close / destroy
    // ========================================================================

    /// Close the stream and release the buffered chunk
    ///
    /// Emits `close` with a `{errno: 0, message}` notice when `emit_close`
    /// is set. A no-op if the stream is already closed or destroyed.
    pub fn close(&mut self, reason: Option<&str>) {
        if self.state.is_finished() {
            return;
        }

        self.transition(StreamState::Closed);
        self.buffered = None;

        let notice = StreamNotice::ok(reason.unwrap_or("stream closed"));
        tracing::info!(
            chunks = self.stats.chunks_pushed,
            bytes = self.stats.bytes_pushed,
            reason = %notice.message,
            "Stream closed"
        );

        if self.config().emit_close {
            self.deliver(&StreamEvent::Close(notice));
        }
    }

    /// Destroy a closed stream
    ///
    /// Requires `auto_destroy` and a `Closed` state. Runs the destroy hook,
    /// drops every listener, and leaves the stream permanently unusable.
    pub fn destroy(&mut self) -> StreamResult<()> {
        self.ensure_alive()?;
        if !self.config().auto_destroy {
            return Err(StreamError::DestroyNotPermitted);
        }
        if self.state != StreamState::Closed {
            return Err(StreamError::NotClosed { state: self.state });
        }

        self.transition(StreamState::Destroyed);
        self.registry.remove_all_listeners(None);

        let notice = StreamNotice::ok("stream destroyed");
        for (index, hook) in std::mem::take(&mut self.destroy_hooks)
            .into_iter()
            .enumerate()
        {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| hook(&notice))) {
                self.stats.listener_failures += 1;
                tracing::warn!(
                    index = index,
                    error = %panic_message(panic.as_ref()),
                    "Destroy hook failed"
                );
            }
        }
        tracing::info!("Stream destroyed");
        Ok(())
    }

    // ========================================================================
    // Fan-out
    // ========================================================================

    /// Clone of the buffered chunk for fan-out
    ///
    /// Fails once the stream is ending, closed or destroyed: no new writes
    /// start after close. The returned chunk is independent of the stream, so
    /// writes already in flight are unaffected by a later close.
    pub fn fanout_snapshot(&self) -> StreamResult<Option<Chunk>> {
        self.ensure_open()?;
        Ok(self.buffered.clone())
    }

    /// Write the buffered chunk to every sink
    ///
    /// Returns one result per sink, in sink order; empty when nothing is
    /// buffered.
    pub async fn write_buffered(
        &self,
        writer: &FanoutWriter,
        sinks: &[Arc<dyn Sink>],
    ) -> StreamResult<Vec<StreamResult<()>>> {
        match self.fanout_snapshot()? {
            Some(chunk) => Ok(writer.write_all(&chunk, sinks).await),
            None => Ok(Vec::new()),
        }
    }
}

impl fmt::Debug for StreamCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamCore")
            .field("state", &self.state)
            .field("config", self.config())
            .field("buffered_bytes", &self.buffered.as_ref().map(Chunk::byte_len))
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
