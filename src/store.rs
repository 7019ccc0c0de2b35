use crate::event::Event;
use std::io;
use std::sync::Arc;

/// Outcome of a successful conditional append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendResult {
    /// Committed event count of the stream before the append.
    pub previous_count: u64,
    /// Committed event count of the stream after the append.
    pub new_count: u64,
}

impl AppendResult {
    /// Number of events written by this append.
    pub fn appended(&self) -> u64 {
        self.new_count - self.previous_count
    }
}

/// Details about a failed conditional append.
///
/// Returned when the stream's committed event count no longer matches the
/// count the caller read. Nothing was written.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "concurrency conflict on stream '{stream_id}': expected {expected_count} events, found {actual_count} (hint: stream was modified; reload and retry)"
)]
pub struct ConcurrencyConflict {
    /// The stream the append targeted.
    pub stream_id: String,
    /// The event count the caller expected.
    pub expected_count: u64,
    /// The event count actually committed at the time of the append.
    pub actual_count: u64,
}

/// Error returned by [`EventStore::append`].
#[derive(Debug, thiserror::Error)]
pub enum AppendError {
    /// The stream was modified since it was read.
    #[error(transparent)]
    Conflict(ConcurrencyConflict),

    /// An I/O error occurred during the append.
    #[error("{0}")]
    Io(#[from] io::Error),
}

/// A durable, append-only, per-stream event log.
///
/// Implementations are the single source of truth for ordering and conflict
/// detection. `append` must be all-or-nothing: either every event in the
/// batch becomes visible to `read`, or none does.
pub trait EventStore {
    /// Read every committed event of `stream_id` in append order.
    ///
    /// Returns an empty vector for a stream that has never been written.
    fn read(&self, stream_id: &str) -> io::Result<Vec<Event>>;

    /// Append `events` to `stream_id` if and only if the stream currently
    /// holds exactly `expected_count` committed events.
    ///
    /// An empty batch with a matching count is a successful no-op.
    fn append(
        &self,
        stream_id: &str,
        expected_count: u64,
        events: &[Event],
    ) -> Result<AppendResult, AppendError>;

    /// Number of committed events in `stream_id`.
    fn event_count(&self, stream_id: &str) -> io::Result<u64> {
        Ok(self.read(stream_id)?.len() as u64)
    }
}

impl<S: EventStore + ?Sized> EventStore for &S {
    fn read(&self, stream_id: &str) -> io::Result<Vec<Event>> {
        (**self).read(stream_id)
    }

    fn append(
        &self,
        stream_id: &str,
        expected_count: u64,
        events: &[Event],
    ) -> Result<AppendResult, AppendError> {
        (**self).append(stream_id, expected_count, events)
    }

    fn event_count(&self, stream_id: &str) -> io::Result<u64> {
        (**self).event_count(stream_id)
    }
}

impl<S: EventStore + ?Sized> EventStore for Arc<S> {
    fn read(&self, stream_id: &str) -> io::Result<Vec<Event>> {
        (**self).read(stream_id)
    }

    fn append(
        &self,
        stream_id: &str,
        expected_count: u64,
        events: &[Event],
    ) -> Result<AppendResult, AppendError> {
        (**self).append(stream_id, expected_count, events)
    }

    fn event_count(&self, stream_id: &str) -> io::Result<u64> {
        (**self).event_count(stream_id)
    }
}

impl<S: EventStore + ?Sized> EventStore for Box<S> {
    fn read(&self, stream_id: &str) -> io::Result<Vec<Event>> {
        (**self).read(stream_id)
    }

    fn append(
        &self,
        stream_id: &str,
        expected_count: u64,
        events: &[Event],
    ) -> Result<AppendResult, AppendError> {
        (**self).append(stream_id, expected_count, events)
    }

    fn event_count(&self, stream_id: &str) -> io::Result<u64> {
        (**self).event_count(stream_id)
    }
}
