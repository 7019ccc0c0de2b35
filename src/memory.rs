use crate::event::Event;
use crate::store::{AppendError, AppendResult, ConcurrencyConflict, EventStore};
use std::collections::HashMap;
use std::io;
use std::sync::{Arc, RwLock};

/// An in-process event store.
///
/// Streams live in a shared map; clones share the same streams, so several
/// repositories can race against one `MemoryStore` the same way they would
/// against a durable store. The write lock makes the count check and the
/// append one atomic step.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    streams: Arc<RwLock<HashMap<String, Vec<Event>>>>,
}

fn poisoned() -> io::Error {
    io::Error::other("memory store lock poisoned")
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids of every stream holding at least one event, sorted.
    pub fn stream_ids(&self) -> io::Result<Vec<String>> {
        let streams = self.streams.read().map_err(|_| poisoned())?;
        let mut ids: Vec<String> = streams.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

impl EventStore for MemoryStore {
    fn read(&self, stream_id: &str) -> io::Result<Vec<Event>> {
        let streams = self.streams.read().map_err(|_| poisoned())?;
        Ok(streams.get(stream_id).cloned().unwrap_or_default())
    }

    fn append(
        &self,
        stream_id: &str,
        expected_count: u64,
        events: &[Event],
    ) -> Result<AppendResult, AppendError> {
        let mut streams = self.streams.write().map_err(|_| poisoned())?;

        let actual_count = streams.get(stream_id).map_or(0, |s| s.len() as u64);
        if actual_count != expected_count {
            return Err(AppendError::Conflict(ConcurrencyConflict {
                stream_id: stream_id.to_string(),
                expected_count,
                actual_count,
            }));
        }

        if !events.is_empty() {
            streams
                .entry(stream_id.to_string())
                .or_default()
                .extend_from_slice(events);
        }

        Ok(AppendResult {
            previous_count: actual_count,
            new_count: actual_count + events.len() as u64,
        })
    }

    fn event_count(&self, stream_id: &str) -> io::Result<u64> {
        let streams = self.streams.read().map_err(|_| poisoned())?;
        Ok(streams.get(stream_id).map_or(0, |s| s.len() as u64))
    }
}
