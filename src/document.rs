use crate::event::{Event, EventPayload};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Error returned when an event cannot be applied to a document.
///
/// A failed apply leaves the document's state and version untouched and is
/// not reported to the observer.
#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    /// No handler is registered for the event's kind.
    #[error("no handler registered for event kind '{kind}'")]
    UnknownKind { kind: String },

    /// The payload does not match the registered handler's type.
    #[error("malformed payload for event kind '{kind}': {source}")]
    Payload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    /// The payload could not be encoded into an event.
    #[error("failed to encode payload for event kind '{kind}': {source}")]
    Encode {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

type ErasedHandler<S> = Box<dyn Fn(&mut S, &Value) -> serde_json::Result<()> + Send + Sync>;

/// Maps event kinds to the state mutations they cause.
///
/// A registry is filled once per document type by [`Document::register`].
/// The same handlers run for replayed history and for freshly emitted
/// events.
pub struct Registry<S> {
    handlers: HashMap<&'static str, ErasedHandler<S>>,
}

impl<S> fmt::Debug for Registry<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.handlers.keys().collect();
        kinds.sort();
        f.debug_struct("Registry").field("kinds", &kinds).finish()
    }
}

impl<S> Default for Registry<S> {
    fn default() -> Self {
        Registry {
            handlers: HashMap::new(),
        }
    }
}

impl<S: 'static> Registry<S> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for events of kind `P::KIND`.
    ///
    /// Registering the same kind twice replaces the earlier handler.
    pub fn on<P: EventPayload + 'static>(&mut self, handler: fn(&mut S, P)) -> &mut Self {
        let erased: ErasedHandler<S> = Box::new(move |state: &mut S, data: &Value| {
            let payload = P::deserialize(data)?;
            handler(state, payload);
            Ok(())
        });
        if self.handlers.insert(P::KIND, erased).is_some() {
            log::warn!(
                "docfold: handler for event kind '{}' registered twice, keeping the last one",
                P::KIND
            );
        }
        self
    }

    /// Returns `true` if a handler is registered for `kind`.
    pub fn handles(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<_> = self.handlers.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }

    fn dispatch(&self, state: &mut S, event: &Event) -> Result<(), ApplyError> {
        let handler = self
            .handlers
            .get(event.kind.as_str())
            .ok_or_else(|| ApplyError::UnknownKind {
                kind: event.kind.clone(),
            })?;
        handler(state, &event.data).map_err(|source| ApplyError::Payload {
            kind: event.kind.clone(),
            source,
        })
    }
}

/// Opaque token identifying one loaded document instance.
///
/// Handed out by the repository at load time and unique within the process,
/// so a document loaded through one repository is never mistaken for one
/// loaded through another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentHandle(u64);

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

impl DocumentHandle {
    pub(crate) fn next() -> Self {
        DocumentHandle(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for DocumentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "doc#{}", self.0)
    }
}

/// Callback notified of every event applied after it was installed.
pub type Observer = Box<dyn FnMut(&Event) + Send>;

/// State, handlers and observer slot shared by every document type.
///
/// State is only ever mutated inside [`apply`](DocumentCore::apply); business
/// methods validate their input and call [`emit`](DocumentCore::emit).
pub struct DocumentCore<S> {
    state: S,
    registry: Registry<S>,
    version: u64,
    observer: Option<Observer>,
    handle: Option<DocumentHandle>,
}

impl<S: fmt::Debug> fmt::Debug for DocumentCore<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentCore")
            .field("state", &self.state)
            .field("version", &self.version)
            .field("observed", &self.observer.is_some())
            .field("handle", &self.handle)
            .finish()
    }
}

impl<S: Default + 'static> DocumentCore<S> {
    /// Create a core holding `S::default()` with the given handlers.
    pub fn new(registry: Registry<S>) -> Self {
        DocumentCore {
            state: S::default(),
            registry,
            version: 0,
            observer: None,
            handle: None,
        }
    }

    /// The current state.
    pub fn state(&self) -> &S {
        &self.state
    }

    /// Number of events applied so far.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// The handle assigned by the owning repository, if tracked.
    pub fn handle(&self) -> Option<DocumentHandle> {
        self.handle
    }

    /// The handlers this document dispatches to.
    pub fn registry(&self) -> &Registry<S> {
        &self.registry
    }

    /// Apply one event: dispatch by kind, mutate state, notify the observer.
    ///
    /// This is the only path that changes state, whether the event comes from
    /// history or from [`emit`](DocumentCore::emit).
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError`] if the kind is unknown or the payload is
    /// malformed. State is left unchanged.
    pub fn apply(&mut self, event: &Event) -> Result<(), ApplyError> {
        self.registry.dispatch(&mut self.state, event)?;
        self.version += 1;
        log::trace!(
            "docfold: applied '{}' (version {})",
            event.kind,
            self.version
        );
        if let Some(observer) = self.observer.as_mut() {
            observer(event);
        }
        Ok(())
    }

    /// Encode `payload` as an event and apply it immediately.
    ///
    /// Call only after every precondition has been checked.
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError`] if the payload cannot be encoded or has no
    /// registered handler.
    pub fn emit<P: EventPayload>(&mut self, payload: P) -> Result<(), ApplyError> {
        let event = Event::from_payload(&payload).map_err(|source| ApplyError::Encode {
            kind: P::KIND.to_string(),
            source,
        })?;
        self.apply(&event)
    }

    /// Install `observer` in the empty observer slot.
    ///
    /// The slot holds a single observer. If it is already occupied, or the
    /// document is tracked by a repository, the new observer is handed back
    /// unchanged.
    pub fn observe(&mut self, observer: Observer) -> Result<(), Observer> {
        if self.observer.is_some() || self.handle.is_some() {
            return Err(observer);
        }
        self.observer = Some(observer);
        Ok(())
    }

    /// Remove the current observer, if any.
    ///
    /// While a repository tracks the document the slot belongs to it and
    /// this returns `None` without touching the slot.
    pub fn unobserve(&mut self) -> Option<Observer> {
        if self.handle.is_some() {
            return None;
        }
        self.observer.take()
    }

    /// Returns `true` if an observer is installed.
    pub fn is_observed(&self) -> bool {
        self.observer.is_some()
    }

    pub(crate) fn bind(&mut self, handle: DocumentHandle, observer: Observer) {
        self.observer = Some(observer);
        self.handle = Some(handle);
    }

    pub(crate) fn release(&mut self) -> Option<DocumentHandle> {
        self.observer = None;
        self.handle.take()
    }
}

/// A rebuildable entity whose state is a fold over its event stream.
///
/// Implementors wrap a [`DocumentCore`] and expose business methods that
/// validate input, then emit. State fields are never assigned directly.
///
/// # Examples
///
/// ```
/// use docfold::{Document, DocumentCore, Error, EventPayload, Registry};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Default)]
/// struct CounterState {
///     value: u64,
/// }
///
/// #[derive(Serialize, Deserialize)]
/// struct Added {
///     amount: u64,
/// }
///
/// impl EventPayload for Added {
///     const KIND: &'static str = "added";
/// }
///
/// struct Counter {
///     core: DocumentCore<CounterState>,
/// }
///
/// impl Document for Counter {
///     const DOCUMENT_TYPE: &'static str = "counter";
///     type State = CounterState;
///
///     fn register(registry: &mut Registry<CounterState>) {
///         registry.on(on_added);
///     }
///
///     fn from_core(core: DocumentCore<CounterState>) -> Self {
///         Counter { core }
///     }
///
///     fn core(&self) -> &DocumentCore<CounterState> {
///         &self.core
///     }
///
///     fn core_mut(&mut self) -> &mut DocumentCore<CounterState> {
///         &mut self.core
///     }
/// }
///
/// fn on_added(state: &mut CounterState, event: Added) {
///     state.value += event.amount;
/// }
///
/// impl Counter {
///     fn add(&mut self, amount: u64) -> Result<(), Error> {
///         if amount == 0 {
///             return Ok(());
///         }
///         self.core.emit(Added { amount })?;
///         Ok(())
///     }
/// }
///
/// let mut counter = Counter::new();
/// counter.add(3).unwrap();
/// counter.add(0).unwrap();
/// assert_eq!(counter.state().value, 3);
/// assert_eq!(counter.version(), 1);
/// ```
pub trait Document: Sized {
    /// Identifies the document type (e.g. `"user"`). Prefixes stream ids.
    const DOCUMENT_TYPE: &'static str;

    /// The state folded from events.
    type State: Default + 'static;

    /// Register a handler for every event kind this document understands.
    fn register(registry: &mut Registry<Self::State>);

    /// Wrap a freshly built core.
    fn from_core(core: DocumentCore<Self::State>) -> Self;

    /// Borrow the core.
    fn core(&self) -> &DocumentCore<Self::State>;

    /// Mutably borrow the core.
    fn core_mut(&mut self) -> &mut DocumentCore<Self::State>;

    /// Create an empty document with its handlers registered.
    fn new() -> Self {
        let mut registry = Registry::new();
        Self::register(&mut registry);
        Self::from_core(DocumentCore::new(registry))
    }

    /// Build a document by applying `events` in order to an empty one.
    ///
    /// The result is untracked.
    fn replay<'a>(events: impl IntoIterator<Item = &'a Event>) -> Result<Self, ApplyError> {
        let mut document = Self::new();
        for event in events {
            document.core_mut().apply(event)?;
        }
        Ok(document)
    }

    /// The current state.
    fn state(&self) -> &Self::State {
        self.core().state()
    }

    /// Number of events applied so far.
    fn version(&self) -> u64 {
        self.core().version()
    }

    /// The repository handle, if this instance is currently tracked.
    fn handle(&self) -> Option<DocumentHandle> {
        self.core().handle()
    }

    /// Map a document id to the stream holding its events.
    fn stream_id(id: &str) -> String {
        format!("{}-{}", Self::DOCUMENT_TYPE, id)
    }
}
