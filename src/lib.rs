mod document;
mod error;
mod event;
mod file;
mod memory;
mod repository;
mod store;

pub use document::{ApplyError, Document, DocumentCore, DocumentHandle, Observer, Registry};
pub use error::Error;
pub use event::{Event, EventPayload};
pub use file::{stream_hash, FileStore, FileStoreBuilder, LockMode};
pub use memory::MemoryStore;
pub use repository::{Repository, TrackingStatus};
pub use store::{AppendError, AppendResult, ConcurrencyConflict, EventStore};
