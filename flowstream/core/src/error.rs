//! Stream Errors
//!
//! Every fallible stream operation returns [`StreamError`]. Configuration and
//! listener-management failures are reported to the caller of the failing
//! operation; failures inside a listener never surface here (they are routed
//! to the `error` event instead, see [`crate::listener`]).

use thiserror::Error;

use crate::events::EventKind;
use crate::stream::StreamState;

/// Errors raised by stream, registry, gate and fan-out operations
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StreamError {
    /// Payload is neither textual nor byte-like while object mode is off
    #[error("Invalid payload type: expected text or bytes, got {found}")]
    InvalidPayloadType {
        /// Kind of payload that was offered
        found: &'static str,
    },

    /// Payload exceeds the configured high-water mark after normalization
    #[error("Payload too large: {size} bytes (high-water mark: {limit} bytes)")]
    PayloadTooLarge {
        /// Size after encoding normalization
        size: usize,
        /// Configured high-water mark
        limit: usize,
    },

    /// Event name is outside the fixed listener set
    #[error("Unknown event: {name}")]
    UnknownEvent {
        /// The rejected event name
        name: String,
    },

    /// Listener cap for an event kind reached
    #[error("Too many listeners for '{kind}': limit is {limit}")]
    TooManyListeners {
        /// Event kind that is full
        kind: EventKind,
        /// Configured cap
        limit: usize,
    },

    /// Index or range outside the listener sequence
    #[error("Index out of range: [{start}, {end}) for sequence of length {len}")]
    IndexOutOfRange {
        /// Start index (or the insert position)
        start: usize,
        /// End index (equal to `start` for inserts)
        end: usize,
        /// Current sequence length
        len: usize,
    },

    /// Removal requested from an empty listener sequence
    #[error("No listeners registered for '{kind}'")]
    NoListenersRegistered {
        /// Event kind with no listeners
        kind: EventKind,
    },

    /// The stream has been destroyed; terminal
    #[error("Stream destroyed")]
    StreamDestroyed,

    /// `emitClose` is on while `autoDestroy` is off
    #[error("Conflicting lifecycle config: emitClose requires autoDestroy")]
    ConflictingLifecycleConfig,

    /// Sink failed its capability check
    #[error("Incompatible sink: {sink}")]
    IncompatibleSink {
        /// Sink label
        sink: String,
    },

    /// The stream no longer accepts data or signals
    #[error("Stream is {state} and no longer accepts this operation")]
    StreamClosed {
        /// State at the time of the call
        state: StreamState,
    },

    /// Destroy requested before the stream was closed
    #[error("Stream must be closed before destroy (current state: {state})")]
    NotClosed {
        /// State at the time of the call
        state: StreamState,
    },

    /// Destroy requested while `autoDestroy` is off
    #[error("Destroy not permitted: autoDestroy is disabled")]
    DestroyNotPermitted,

    /// `emit` called with an event only the stream itself may raise
    #[error("Event '{kind}' is raised by the stream and cannot be emitted directly")]
    ReservedEvent {
        /// The lifecycle or data event that was refused
        kind: EventKind,
    },

    /// `set_max_listeners` called with zero
    #[error("Max listeners must be a positive integer")]
    InvalidMaxListeners,

    /// A sink accepted the capability check but its write failed
    #[error("Sink write failed: {message}")]
    SinkFailed {
        /// Failure description
        message: String,
    },
}

impl StreamError {
    /// Whether this error leaves the stream permanently unusable
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::StreamDestroyed)
    }

    /// Whether the payload was rejected by admission control
    #[must_use]
    pub fn is_admission(&self) -> bool {
        matches!(
            self,
            Self::InvalidPayloadType { .. } | Self::PayloadTooLarge { .. }
        )
    }
}

/// Result alias for stream operations
pub type StreamResult<T> = Result<T, StreamError>;
