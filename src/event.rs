use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

/// A typed event payload bound to a stable kind tag.
///
/// The `KIND` string is what gets persisted and what handler lookup keys off.
/// It must never change once events of that kind have been written, even if
/// the Rust type is renamed.
///
/// # Examples
///
/// ```
/// use docfold::EventPayload;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct NameChanged {
///     name: String,
/// }
///
/// impl EventPayload for NameChanged {
///     const KIND: &'static str = "name_changed";
/// }
/// ```
pub trait EventPayload: Serialize + DeserializeOwned {
    /// The discriminator written to [`Event::kind`].
    const KIND: &'static str;
}

/// An immutable event record.
///
/// `kind` is an explicit discriminator and `data` is the kind-specific
/// payload as JSON. The record itself has no opinion about payload shapes;
/// a document's handler registry gives events meaning.
///
/// Optional metadata fields (`id`, `actor`, `meta`) are omitted from the
/// serialized form when `None`.
///
/// # Examples
///
/// ```
/// use docfold::Event;
/// use serde_json::json;
///
/// let event = Event::new("user_created", json!({"name": "Andreas"}))
///     .with_actor("admin");
/// assert_eq!(event.kind, "user_created");
/// assert_eq!(event.actor.as_deref(), Some("admin"));
/// assert!(event.ts > 0);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// The event kind tag (e.g. `"user_created"`).
    pub kind: String,

    /// Kind-specific payload. `null` for payloads without fields.
    #[serde(default)]
    pub data: Value,

    /// Unix timestamp in seconds, populated by [`Event::new`].
    pub ts: u64,

    /// Caller-supplied unique identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Identity of whoever caused the event. Interpretation is up to the
    /// application.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,

    /// Metadata bag for cross-cutting concerns (correlation ids, sources,
    /// schema versions). Kept apart from `data` so payloads stay clean.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl Event {
    /// Create a new event with the given kind and payload, stamped with the
    /// current time.
    pub fn new(kind: &str, data: Value) -> Self {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Event {
            kind: kind.to_string(),
            data,
            ts,
            id: None,
            actor: None,
            meta: None,
        }
    }

    /// Encode a typed payload into an event tagged with `P::KIND`.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized to JSON.
    ///
    /// # Examples
    ///
    /// ```
    /// use docfold::{Event, EventPayload};
    /// use serde::{Deserialize, Serialize};
    ///
    /// #[derive(Debug, PartialEq, Serialize, Deserialize)]
    /// struct Renamed {
    ///     name: String,
    /// }
    ///
    /// impl EventPayload for Renamed {
    ///     const KIND: &'static str = "renamed";
    /// }
    ///
    /// let event = Event::from_payload(&Renamed { name: "Ann".into() }).unwrap();
    /// assert_eq!(event.kind, "renamed");
    /// assert_eq!(event.data["name"], "Ann");
    /// assert_eq!(event.decode::<Renamed>().unwrap(), Renamed { name: "Ann".into() });
    /// ```
    pub fn from_payload<P: EventPayload>(payload: &P) -> serde_json::Result<Self> {
        Ok(Event::new(P::KIND, serde_json::to_value(payload)?))
    }

    /// Returns `true` if this event carries the kind tag of `P`.
    pub fn is<P: EventPayload>(&self) -> bool {
        self.kind == P::KIND
    }

    /// Decode the payload as `P`.
    ///
    /// Only the payload is interpreted; callers that dispatch on kind should
    /// check [`Event::is`] first.
    ///
    /// # Errors
    ///
    /// Returns an error if `data` does not deserialize into `P`.
    pub fn decode<P: EventPayload>(&self) -> serde_json::Result<P> {
        P::deserialize(&self.data)
    }

    /// Set the event's unique identifier.
    ///
    /// # Examples
    ///
    /// ```
    /// use docfold::Event;
    /// use serde_json::json;
    ///
    /// let event = Event::new("user_created", json!({})).with_id("evt-7");
    /// assert_eq!(event.id.as_deref(), Some("evt-7"));
    /// ```
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the actor that caused this event.
    ///
    /// # Examples
    ///
    /// ```
    /// use docfold::Event;
    /// use serde_json::json;
    ///
    /// let event = Event::new("name_updated", json!({"name": "Ann"})).with_actor("admin");
    /// assert_eq!(event.actor.as_deref(), Some("admin"));
    /// ```
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Set extensible metadata.
    ///
    /// # Examples
    ///
    /// ```
    /// use docfold::Event;
    /// use serde_json::json;
    ///
    /// let event = Event::new("name_updated", json!({"name": "Ann"}))
    ///     .with_meta(json!({"request": "req-19"}));
    /// assert_eq!(event.meta.unwrap()["request"], "req-19");
    /// ```
    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }
}
