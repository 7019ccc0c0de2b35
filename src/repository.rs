use crate::document::{Document, DocumentHandle};
use crate::error::Error;
use crate::event::Event;
use crate::store::{AppendResult, EventStore};
use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, TryRecvError};

/// Where a document instance stands with respect to a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingStatus {
    /// Loaded and not yet saved. New events are captured for the next save.
    Tracked,
    /// The last save hit a concurrency conflict. Pending events are kept.
    ConflictPending,
    /// Not tracked: never loaded here, already saved, or discarded.
    Untracked,
}

struct Tracked {
    stream_id: String,
    expected_count: u64,
    pending: Vec<Event>,
    inbox: Receiver<Event>,
    conflicted: bool,
}

impl Tracked {
    /// Move events captured by the observer into `pending`.
    fn collect(&mut self) -> &[Event] {
        self.pending.extend(self.inbox.try_iter());
        &self.pending
    }

    /// The observer owns the sender, so a disconnected inbox means the
    /// document itself was dropped.
    fn is_orphaned(&mut self) -> bool {
        self.collect();
        matches!(self.inbox.try_recv(), Err(TryRecvError::Disconnected))
    }
}

/// Loads documents from an [`EventStore`] and saves their new events under
/// optimistic concurrency.
///
/// Tracking is keyed by the [`DocumentHandle`] each loaded instance
/// receives, so two instances loaded for the same id are tracked and saved
/// independently. Whichever saves second gets [`Error::Conflict`].
///
/// # Examples
///
/// ```
/// # use docfold::{Document, DocumentCore, Error, EventPayload, Registry};
/// # use serde::{Deserialize, Serialize};
/// # #[derive(Debug, Default)]
/// # struct NoteState { text: String }
/// # #[derive(Serialize, Deserialize)]
/// # struct Written { text: String }
/// # impl EventPayload for Written { const KIND: &'static str = "written"; }
/// # fn on_written(state: &mut NoteState, e: Written) { state.text = e.text; }
/// # struct Note { core: DocumentCore<NoteState> }
/// # impl Document for Note {
/// #     const DOCUMENT_TYPE: &'static str = "note";
/// #     type State = NoteState;
/// #     fn register(r: &mut Registry<NoteState>) { r.on(on_written); }
/// #     fn from_core(core: DocumentCore<NoteState>) -> Self { Note { core } }
/// #     fn core(&self) -> &DocumentCore<NoteState> { &self.core }
/// #     fn core_mut(&mut self) -> &mut DocumentCore<NoteState> { &mut self.core }
/// # }
/// # impl Note {
/// #     fn write(&mut self, text: &str) -> Result<(), Error> {
/// #         if text.is_empty() {
/// #             return Err(Error::validation("text must not be empty"));
/// #         }
/// #         self.core.emit(Written { text: text.into() })?;
/// #         Ok(())
/// #     }
/// # }
/// use docfold::{MemoryStore, Repository};
///
/// let mut repo = Repository::new(MemoryStore::new());
///
/// let mut note: Note = repo.load("n1")?;
/// note.write("hello")?;
/// repo.save(&mut note)?;
///
/// let note: Note = repo.load("n1")?;
/// assert_eq!(note.state().text, "hello");
/// assert_eq!(note.version(), 1);
/// # Ok::<(), Error>(())
/// ```
pub struct Repository<S> {
    store: S,
    tracked: HashMap<DocumentHandle, Tracked>,
}

impl<S> std::fmt::Debug for Repository<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("tracked", &self.tracked.len())
            .finish()
    }
}

impl<S: EventStore> Repository<S> {
    /// Create a repository over `store`.
    pub fn new(store: S) -> Self {
        Repository {
            store,
            tracked: HashMap::new(),
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Consume the repository, returning the store. Tracked entries are
    /// dropped.
    pub fn into_store(self) -> S {
        self.store
    }

    /// Load document `id` of type `D` and start tracking it.
    ///
    /// History is replayed before the repository's observer is attached, so
    /// only events emitted after `load` returns are saved later. A stream
    /// that was never written yields an empty document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the read fails and [`Error::Apply`] if
    /// a historical event cannot be applied.
    pub fn load<D: Document>(&mut self, id: &str) -> Result<D, Error> {
        self.prune();
        let stream_id = D::stream_id(id);
        let history = self.store.read(&stream_id)?;

        let document = D::replay(&history)?;
        let expected_count = history.len() as u64;
        Ok(self.track(document, stream_id, expected_count))
    }

    fn track<D: Document>(&mut self, mut document: D, stream_id: String, expected_count: u64) -> D {
        let handle = DocumentHandle::next();
        let (tx, inbox) = mpsc::channel();
        let observer = Box::new(move |event: &Event| {
            // The receiver is gone once the entry is dropped.
            let _ = tx.send(event.clone());
        });
        document.core_mut().bind(handle, observer);

        log::debug!(
            "docfold: loaded {} '{}' at version {} as {}",
            D::DOCUMENT_TYPE,
            stream_id,
            expected_count,
            handle
        );

        self.tracked.insert(
            handle,
            Tracked {
                stream_id,
                expected_count,
                pending: Vec::new(),
                inbox,
                conflicted: false,
            },
        );
        document
    }

    /// Append the document's pending events and stop tracking it.
    ///
    /// The append only succeeds if the stream still holds the number of
    /// events it held at load time. On success the document is released: it
    /// stays usable but a second `save` fails with [`Error::Untracked`].
    ///
    /// # Errors
    ///
    /// - [`Error::Untracked`] if this repository does not track `document`.
    /// - [`Error::Conflict`] if the stream was modified since load. The entry
    ///   and its pending events are kept; no retry is attempted.
    /// - [`Error::Storage`] if the store failed. The entry is kept; the
    ///   append's outcome is unknown until the stream is read again.
    pub fn save<D: Document>(&mut self, document: &mut D) -> Result<AppendResult, Error> {
        let handle = document.handle().ok_or(Error::Untracked { handle: None })?;
        let tracked = self
            .tracked
            .get_mut(&handle)
            .ok_or(Error::Untracked {
                handle: Some(handle),
            })?;

        tracked.collect();
        let outcome =
            self.store
                .append(&tracked.stream_id, tracked.expected_count, &tracked.pending);

        match outcome {
            Ok(result) => {
                self.tracked.remove(&handle);
                document.core_mut().release();
                log::debug!(
                    "docfold: saved {} ({} events, stream at {})",
                    handle,
                    result.appended(),
                    result.new_count
                );
                Ok(result)
            }
            Err(err) => {
                let err = Error::from(err);
                if let Error::Conflict(conflict) = &err {
                    tracked.conflicted = true;
                    log::warn!("docfold: {handle}: {conflict}");
                }
                Err(err)
            }
        }
    }

    /// Stop tracking `document` without saving, returning its pending events.
    ///
    /// Use this to abandon an instance after a conflict before reloading.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Untracked`] if this repository does not track
    /// `document`.
    pub fn discard<D: Document>(&mut self, document: &mut D) -> Result<Vec<Event>, Error> {
        let handle = document.handle().ok_or(Error::Untracked { handle: None })?;
        let mut tracked = self.tracked.remove(&handle).ok_or(Error::Untracked {
            handle: Some(handle),
        })?;
        tracked.collect();
        document.core_mut().release();
        log::debug!(
            "docfold: discarded {} with {} pending events",
            handle,
            tracked.pending.len()
        );
        Ok(tracked.pending)
    }

    /// Events emitted on `document` since load that are not yet saved.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Untracked`] if this repository does not track
    /// `document`.
    pub fn pending<D: Document>(&mut self, document: &D) -> Result<&[Event], Error> {
        let handle = document.handle().ok_or(Error::Untracked { handle: None })?;
        let tracked = self.tracked.get_mut(&handle).ok_or(Error::Untracked {
            handle: Some(handle),
        })?;
        Ok(tracked.collect())
    }

    /// The stream event count `document` will be saved against, if tracked.
    pub fn expected_count<D: Document>(&self, document: &D) -> Option<u64> {
        document
            .handle()
            .and_then(|handle| self.tracked.get(&handle))
            .map(|tracked| tracked.expected_count)
    }

    /// Where `document` stands with respect to this repository.
    pub fn status<D: Document>(&self, document: &D) -> TrackingStatus {
        match document.handle().and_then(|h| self.tracked.get(&h)) {
            Some(tracked) if tracked.conflicted => TrackingStatus::ConflictPending,
            Some(_) => TrackingStatus::Tracked,
            None => TrackingStatus::Untracked,
        }
    }

    /// Number of document instances currently tracked. Entries whose
    /// document has been dropped are released first.
    pub fn tracked_len(&mut self) -> usize {
        self.prune();
        self.tracked.len()
    }

    fn prune(&mut self) {
        let before = self.tracked.len();
        self.tracked.retain(|_, tracked| !tracked.is_orphaned());
        let dropped = before - self.tracked.len();
        if dropped > 0 {
            log::debug!("docfold: released {dropped} dropped documents");
        }
    }
}
