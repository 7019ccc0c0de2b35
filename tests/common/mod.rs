#![allow(dead_code)]

use docfold::{
    AppendError, AppendResult, Document, DocumentCore, Error, Event, EventPayload, EventStore,
    Registry, Repository,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::io;

pub fn dummy_event(kind: &str) -> Event {
    Event {
        kind: kind.to_string(),
        data: json!({"key": "value"}),
        ts: 1000,
        id: None,
        actor: None,
        meta: None,
    }
}

pub fn dummy_events(n: usize) -> Vec<Event> {
    (0..n).map(|i| dummy_event(&format!("event_{i}"))).collect()
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct UserState {
    pub created: bool,
    pub name: String,
    pub email: Option<String>,
    pub renames: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserCreated {
    pub name: String,
}

impl EventPayload for UserCreated {
    const KIND: &'static str = "user_created";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NameUpdated {
    pub name: String,
}

impl EventPayload for NameUpdated {
    const KIND: &'static str = "name_updated";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailChanged {
    pub email: Option<String>,
}

impl EventPayload for EmailChanged {
    const KIND: &'static str = "email_changed";
}

fn on_created(state: &mut UserState, event: UserCreated) {
    state.created = true;
    state.name = event.name;
}

fn on_name_updated(state: &mut UserState, event: NameUpdated) {
    state.name = event.name;
    state.renames += 1;
}

fn on_email_changed(state: &mut UserState, event: EmailChanged) {
    state.email = event.email;
}

#[derive(Debug)]
pub struct User {
    core: DocumentCore<UserState>,
}

impl Document for User {
    const DOCUMENT_TYPE: &'static str = "user";
    type State = UserState;

    fn register(registry: &mut Registry<UserState>) {
        registry
            .on(on_created)
            .on(on_name_updated)
            .on(on_email_changed);
    }

    fn from_core(core: DocumentCore<UserState>) -> Self {
        User { core }
    }

    fn core(&self) -> &DocumentCore<UserState> {
        &self.core
    }

    fn core_mut(&mut self) -> &mut DocumentCore<UserState> {
        &mut self.core
    }
}

impl User {
    pub fn name(&self) -> &str {
        &self.core.state().name
    }

    pub fn create(&mut self, name: &str) -> Result<(), Error> {
        if self.core.state().created {
            return Err(Error::validation("user already exists"));
        }
        let name = validate_name(name)?;
        self.core.emit(UserCreated { name })?;
        Ok(())
    }

    pub fn update_name(&mut self, name: &str) -> Result<(), Error> {
        if !self.core.state().created {
            return Err(Error::validation("user does not exist"));
        }
        let name = validate_name(name)?;
        if name == self.core.state().name {
            return Ok(());
        }
        self.core.emit(NameUpdated { name })?;
        Ok(())
    }

    pub fn change_email(&mut self, email: Option<&str>) -> Result<(), Error> {
        if !self.core.state().created {
            return Err(Error::validation("user does not exist"));
        }
        if let Some(email) = email {
            if !email.contains('@') {
                return Err(Error::validation(format!("'{email}' is not an email address")));
            }
        }
        let email = email.map(str::to_string);
        if email == self.core.state().email {
            return Ok(());
        }
        self.core.emit(EmailChanged { email })?;
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<String, Error> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::validation("name must not be empty"));
    }
    Ok(name.to_string())
}

/// A second document type whose ids overlap with `User`.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TagState {
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tagged {
    pub label: String,
}

impl EventPayload for Tagged {
    const KIND: &'static str = "tagged";
}

fn on_tagged(state: &mut TagState, event: Tagged) {
    state.labels.push(event.label);
}

pub struct Tags {
    core: DocumentCore<TagState>,
}

impl Document for Tags {
    const DOCUMENT_TYPE: &'static str = "tags";
    type State = TagState;

    fn register(registry: &mut Registry<TagState>) {
        registry.on(on_tagged);
    }

    fn from_core(core: DocumentCore<TagState>) -> Self {
        Tags { core }
    }

    fn core(&self) -> &DocumentCore<TagState> {
        &self.core
    }

    fn core_mut(&mut self) -> &mut DocumentCore<TagState> {
        &mut self.core
    }
}

impl Tags {
    pub fn tag(&mut self, label: &str) -> Result<(), Error> {
        if self.core.state().labels.iter().any(|l| l == label) {
            return Ok(());
        }
        self.core.emit(Tagged {
            label: label.to_string(),
        })?;
        Ok(())
    }
}

/// Create user `id` named `name` through a throwaway repository.
pub fn seed_user<S: EventStore>(store: S, id: &str, name: &str) {
    let mut repo = Repository::new(store);
    let mut user: User = repo.load(id).unwrap();
    user.create(name).unwrap();
    repo.save(&mut user).unwrap();
}

/// A store whose every call fails with an I/O error.
pub struct FailingStore;

impl EventStore for FailingStore {
    fn read(&self, _stream_id: &str) -> io::Result<Vec<Event>> {
        Err(io::Error::other("disk on fire"))
    }

    fn append(
        &self,
        _stream_id: &str,
        _expected_count: u64,
        _events: &[Event],
    ) -> Result<AppendResult, AppendError> {
        Err(AppendError::Io(io::Error::other("disk on fire")))
    }
}

/// A store that reads from `inner` but refuses every append.
pub struct ReadOnlyStore<S>(pub S);

impl<S: EventStore> EventStore for ReadOnlyStore<S> {
    fn read(&self, stream_id: &str) -> io::Result<Vec<Event>> {
        self.0.read(stream_id)
    }

    fn append(
        &self,
        _stream_id: &str,
        _expected_count: u64,
        _events: &[Event],
    ) -> Result<AppendResult, AppendError> {
        Err(AppendError::Io(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "read-only store",
        )))
    }
}
