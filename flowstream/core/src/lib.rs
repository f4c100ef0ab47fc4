//! Flowstream Core - Flow-Controlled Push Streams
//!
//! A single-producer stream that buffers one bounded chunk at a time, emits
//! lifecycle events to ordered listeners, and fans the buffered chunk out to
//! any number of sinks. Admission is checked before anything changes, so an
//! unbounded buffer never forms.
//!
//! # Architecture
//!
//! ```text
//!   producer
//!      │ push(payload)
//!      ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                       StreamCore                          │
//! │  ┌──────────────────┐   ┌──────────┐   ┌───────────────┐ │
//! │  │ BackpressureGate │──▶│ buffered │   │ListenerRegistry│ │
//! │  │  (admit / size)  │   │  chunk   │   │ data end error │ │
//! │  └──────────────────┘   └────┬─────┘   │ close pause .. │ │
//! │                              │         └───────────────┘ │
//! └──────────────────────────────┼───────────────────────────┘
//!                                │ fanout_snapshot()
//!                                ▼
//!                         FanoutWriter
//!                    ┌───────┼───────┐
//!                  sink    sink    sink
//! ```
//!
//! # Key Types
//!
//! - [`StreamCore`]: state, buffered chunk, listener registry, close/destroy
//! - [`ListenerRegistry`]: ordered listener sequences per [`EventKind`]
//! - [`BackpressureGate`]: payload admission against the high-water mark
//! - [`FanoutWriter`]: one chunk to many [`Sink`]s
//! - [`StreamConfig`]: immutable configuration
//!
//! # Quick Start
//!
//! ```
//! use flowstream_core::{callback, EventKind, StreamConfig, StreamCore, StreamState};
//!
//! let mut stream = StreamCore::new(StreamConfig::new().with_high_water_mark(10)).unwrap();
//! stream
//!     .listen(EventKind::Data, callback(|event| {
//!         println!("got {:?}", event.chunk());
//!         Ok(())
//!     }))
//!     .unwrap();
//!
//! stream.push("hello").unwrap();
//! assert_eq!(stream.state(), StreamState::Flowing);
//! assert!(stream.push("hello world!").is_err());
//!
//! stream.push(None::<&str>).unwrap();
//! assert_eq!(stream.state(), StreamState::Closed);
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod events;
pub mod fanout;
pub mod gate;
pub mod listener;
pub mod payload;
pub mod sink;
pub mod stream;

// Re-exports for convenience
pub use config::{
    default_config_path, load_config_from_path, ConfigError, Encoding, StreamConfig,
};
pub use error::{StreamError, StreamResult};
pub use events::{EventKind, ListenerFailure, StreamEvent, StreamNotice};
pub use fanout::{FanoutReport, FanoutStats, FanoutWriter};
pub use gate::BackpressureGate;
pub use listener::{callback, Callback, DeliveryReport, ListenerId, ListenerRegistry};
pub use payload::{Chunk, Payload};
pub use sink::{ChannelSink, MemorySink, Sink};
pub use stream::{DestroyHook, StreamCore, StreamState, StreamStats};
