//! Stream Events
//!
//! Events delivered to listeners. The set of event kinds a listener can
//! register for is fixed: `data`, `end`, `error`, `readable`, `close`,
//! `pause` and `resume`. Destroy notifications are not listener events; see
//! [`crate::StreamCore::on_destroy`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StreamError;
use crate::payload::Chunk;

/// Event kinds listeners may register for
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// A chunk was admitted and buffered
    Data,
    /// The producer signalled end-of-data
    End,
    /// A listener failed, or the owner reported an error
    Error,
    /// Data is available to read
    Readable,
    /// The stream closed
    Close,
    /// Consumers were asked to pause
    Pause,
    /// Consumers were asked to resume
    Resume,
}

impl EventKind {
    /// Every registrable kind, in declaration order
    pub const ALL: [EventKind; 7] = [
        Self::Data,
        Self::End,
        Self::Error,
        Self::Readable,
        Self::Close,
        Self::Pause,
        Self::Resume,
    ];

    /// Event name as used for string-keyed registration
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Data => "data",
            Self::End => "end",
            Self::Error => "error",
            Self::Readable => "readable",
            Self::Close => "close",
            Self::Pause => "pause",
            Self::Resume => "resume",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EventKind {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| StreamError::UnknownEvent {
                name: s.to_string(),
            })
    }
}

/// Structured close/destroy notification
///
/// Formatting and output are left to whoever receives it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamNotice {
    /// Zero on a clean close, non-zero otherwise
    pub errno: i32,
    /// Human-readable description
    pub message: String,
}

impl StreamNotice {
    /// A clean (errno 0) notice
    #[must_use]
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            errno: 0,
            message: message.into(),
        }
    }

    /// Whether this notice reports a clean completion
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.errno == 0
    }
}

/// A failure isolated during delivery
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListenerFailure {
    /// Event kind being delivered when the listener failed
    pub kind: EventKind,
    /// Position of the failing listener in its sequence
    pub index: usize,
    /// Error or panic message
    pub message: String,
}

impl fmt::Display for ListenerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "listener #{} for '{}' failed: {}",
            self.index, self.kind, self.message
        )
    }
}

/// Event payload passed to listeners
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    /// A chunk was buffered
    Data(Chunk),
    /// End of data
    End,
    /// An error occurred
    Error(String),
    /// Data is available
    Readable,
    /// The stream closed
    Close(StreamNotice),
    /// Pause requested
    Pause,
    /// Resume requested
    Resume,
}

impl StreamEvent {
    /// Kind this event is delivered under
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Data(_) => EventKind::Data,
            Self::End => EventKind::End,
            Self::Error(_) => EventKind::Error,
            Self::Readable => EventKind::Readable,
            Self::Close(_) => EventKind::Close,
            Self::Pause => EventKind::Pause,
            Self::Resume => EventKind::Resume,
        }
    }

    /// The chunk carried by a `data` event
    #[must_use]
    pub fn chunk(&self) -> Option<&Chunk> {
        match self {
            Self::Data(chunk) => Some(chunk),
            _ => None,
        }
    }
}
