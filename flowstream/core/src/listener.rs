//! Listener Registry
//!
//! Ordered listener sequences, one per [`EventKind`]. Delivery order always
//! matches sequence order; [`ListenerRegistry::insert_at`] is the only way to
//! place a listener anywhere but the end.
//!
//! # Failure isolation
//!
//! [`ListenerRegistry::deliver`] runs every listener even if an earlier one
//! returns an error or panics. Failures are collected into the returned
//! [`DeliveryReport`]; the registry does not decide what to do with them.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{StreamError, StreamResult};
use crate::events::{EventKind, ListenerFailure, StreamEvent};

/// Listener callback
///
/// Receives a read-only view of the event. Returning an error (or panicking)
/// is reported as a [`ListenerFailure`] without stopping delivery.
pub type Callback = Arc<dyn Fn(&StreamEvent) -> anyhow::Result<()> + Send + Sync>;

/// Unique identifier for a registered listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw numeric value
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// A registered listener
#[derive(Clone)]
struct Listener {
    id: ListenerId,
    callback: Callback,
}

/// Outcome of delivering one event
#[derive(Debug, Clone, Default)]
pub struct DeliveryReport {
    /// Number of listeners invoked
    pub invoked: usize,
    /// Listeners that returned an error or panicked
    pub failures: Vec<ListenerFailure>,
}

impl DeliveryReport {
    /// Check if every listener completed without error
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Ordered listener sequences keyed by event kind
pub struct ListenerRegistry {
    sequences: HashMap<EventKind, Vec<Listener>>,
    max_listeners: usize,
}

impl ListenerRegistry {
    /// Create an empty registry with a per-kind listener cap
    #[must_use]
    pub fn new(max_listeners: usize) -> Self {
        Self {
            sequences: HashMap::new(),
            max_listeners: max_listeners.max(1),
        }
    }

    /// Current per-kind listener cap
    #[must_use]
    pub fn max_listeners(&self) -> usize {
        self.max_listeners
    }

    /// Change the per-kind listener cap
    ///
    /// Lowering the cap below a sequence's current length keeps the existing
    /// listeners; only further registrations are refused.
    pub fn set_max_listeners(&mut self, max: usize) -> StreamResult<()> {
        if max == 0 {
            return Err(StreamError::InvalidMaxListeners);
        }
        self.max_listeners = max;
        Ok(())
    }

    /// Append a listener to the end of `kind`'s sequence
    pub fn listen(&mut self, kind: EventKind, callback: Callback) -> StreamResult<ListenerId> {
        let len = self.listener_count(kind);
        self.insert_at(kind, callback, len)
    }

    /// Append a listener by event name
    ///
    /// Fails with [`StreamError::UnknownEvent`] for names outside the fixed set.
    pub fn listen_named(&mut self, name: &str, callback: Callback) -> StreamResult<ListenerId> {
        let kind: EventKind = name.parse()?;
        self.listen(kind, callback)
    }

    /// Insert a listener at `index`, shifting later listeners right
    ///
    /// `index` may equal the current length (append).
    pub fn insert_at(
        &mut self,
        kind: EventKind,
        callback: Callback,
        index: usize,
    ) -> StreamResult<ListenerId> {
        let limit = self.max_listeners;
        let sequence = self.sequences.entry(kind).or_default();

        if index > sequence.len() {
            return Err(StreamError::IndexOutOfRange {
                start: index,
                end: index,
                len: sequence.len(),
            });
        }

        if sequence.len() >= limit {
            tracing::warn!(
                event = %kind,
                limit = limit,
                "Listener registration refused: cap reached"
            );
            return Err(StreamError::TooManyListeners { kind, limit });
        }

        let id = ListenerId::next();
        sequence.insert(index, Listener { id, callback });
        tracing::debug!(
            event = %kind,
            listener_id = %id,
            index = index,
            "Listener registered"
        );
        Ok(id)
    }

    /// Remove listeners in `[start, end)` from `kind`'s sequence
    pub fn remove_range(&mut self, kind: EventKind, start: usize, end: usize) -> StreamResult<()> {
        let sequence = match self.sequences.get_mut(&kind) {
            Some(sequence) if !sequence.is_empty() => sequence,
            _ => return Err(StreamError::NoListenersRegistered { kind }),
        };

        let len = sequence.len();
        if start > end || end > len {
            return Err(StreamError::IndexOutOfRange { start, end, len });
        }

        sequence.drain(start..end);
        tracing::debug!(
            event = %kind,
            removed = end - start,
            remaining = sequence.len(),
            "Listeners removed"
        );
        Ok(())
    }

    /// Remove a single listener by id
    ///
    /// Returns true if the listener was registered.
    pub fn remove_listener(&mut self, kind: EventKind, id: ListenerId) -> bool {
        let Some(sequence) = self.sequences.get_mut(&kind) else {
            return false;
        };
        let before = sequence.len();
        sequence.retain(|listener| listener.id != id);
        before != sequence.len()
    }

    /// Remove every listener for `kind`, or for all kinds when `None`
    pub fn remove_all_listeners(&mut self, kind: Option<EventKind>) {
        match kind {
            Some(kind) => {
                self.sequences.remove(&kind);
            }
            None => self.sequences.clear(),
        }
    }

    /// Number of listeners registered for `kind`
    #[must_use]
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.sequences.get(&kind).map_or(0, Vec::len)
    }

    /// Listener ids for `kind`, in delivery order
    #[must_use]
    pub fn listener_ids(&self, kind: EventKind) -> Vec<ListenerId> {
        self.sequences
            .get(&kind)
            .map(|sequence| sequence.iter().map(|l| l.id).collect())
            .unwrap_or_default()
    }

    /// Event kinds that currently have at least one listener, sorted
    #[must_use]
    pub fn event_names(&self) -> Vec<EventKind> {
        let mut kinds: Vec<EventKind> = self
            .sequences
            .iter()
            .filter(|(_, sequence)| !sequence.is_empty())
            .map(|(kind, _)| *kind)
            .collect();
        kinds.sort();
        kinds
    }

    /// Invoke every listener for the event's kind, in order
    ///
    /// Each listener runs exactly once. An error or panic in one listener is
    /// recorded and delivery continues with the next.
    pub fn deliver(&self, event: &StreamEvent) -> DeliveryReport {
        let kind = event.kind();
        let Some(sequence) = self.sequences.get(&kind) else {
            return DeliveryReport::default();
        };

        // Snapshot so the sequence is stable for the whole delivery
        let listeners: Vec<Listener> = sequence.clone();
        let mut report = DeliveryReport::default();

        for (index, listener) in listeners.iter().enumerate() {
            report.invoked += 1;
            let outcome = catch_unwind(AssertUnwindSafe(|| (listener.callback)(event)));

            let message = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => format!("{e:#}"),
                Err(panic) => panic_message(panic.as_ref()),
            };

            tracing::warn!(
                event = %kind,
                listener_id = %listener.id,
                index = index,
                error = %message,
                "Listener failed during delivery"
            );
            report.failures.push(ListenerFailure {
                kind,
                index,
                message,
            });
        }

        report
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: Vec<(EventKind, usize)> = self
            .event_names()
            .into_iter()
            .map(|kind| (kind, self.listener_count(kind)))
            .collect();
        f.debug_struct("ListenerRegistry")
            .field("max_listeners", &self.max_listeners)
            .field("listeners", &counts)
            .finish()
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

/// Wrap a closure as a [`Callback`]
pub fn callback<F>(f: F) -> Callback
where
    F: Fn(&StreamEvent) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}
