//! A user profile document saved to a file store: create, no-op update, and a
//! lost race between two editors.

use docfold::{
    Document, DocumentCore, Error, EventPayload, EventStore, FileStore, Registry, Repository,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
struct Profile {
    exists: bool,
    name: String,
}

#[derive(Serialize, Deserialize)]
struct UserCreated {
    name: String,
}

impl EventPayload for UserCreated {
    const KIND: &'static str = "user_created";
}

#[derive(Serialize, Deserialize)]
struct NameUpdated {
    name: String,
}

impl EventPayload for NameUpdated {
    const KIND: &'static str = "name_updated";
}

fn on_created(state: &mut Profile, event: UserCreated) {
    state.exists = true;
    state.name = event.name;
}

fn on_name_updated(state: &mut Profile, event: NameUpdated) {
    state.name = event.name;
}

struct User {
    core: DocumentCore<Profile>,
}

impl Document for User {
    const DOCUMENT_TYPE: &'static str = "user";
    type State = Profile;

    fn register(registry: &mut Registry<Profile>) {
        registry.on(on_created).on(on_name_updated);
    }

    fn from_core(core: DocumentCore<Profile>) -> Self {
        User { core }
    }

    fn core(&self) -> &DocumentCore<Profile> {
        &self.core
    }

    fn core_mut(&mut self) -> &mut DocumentCore<Profile> {
        &mut self.core
    }
}

impl User {
    fn create(&mut self, name: &str) -> Result<(), Error> {
        if self.state().exists {
            return Err(Error::validation("user already exists"));
        }
        if name.is_empty() {
            return Err(Error::validation("name must not be empty"));
        }
        self.core.emit(UserCreated { name: name.into() })?;
        Ok(())
    }

    fn update_name(&mut self, name: &str) -> Result<(), Error> {
        if !self.state().exists {
            return Err(Error::validation("user does not exist"));
        }
        if name.is_empty() {
            return Err(Error::validation("name must not be empty"));
        }
        if name == self.state().name {
            return Ok(());
        }
        self.core.emit(NameUpdated { name: name.into() })?;
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let store = FileStore::open(dir.path())?;
    let mut repo = Repository::new(&store);

    let mut user: User = repo.load("42")?;
    user.create("Andreas")?;
    repo.save(&mut user)?;

    let user: User = repo.load("42")?;
    println!("loaded '{}' at version {}", user.state().name, user.version());

    let mut user: User = repo.load("42")?;
    user.update_name("Andreas")?;
    let saved = repo.save(&mut user)?;
    println!(
        "same-name update appended {} events, stream holds {}",
        saved.appended(),
        store.event_count(&User::stream_id("42"))?
    );

    let mut a: User = repo.load("42")?;
    let mut b: User = repo.load("42")?;
    a.update_name("Ann")?;
    repo.save(&mut a)?;
    println!("editor A renamed to Ann");

    b.update_name("Bo")?;
    match repo.save(&mut b) {
        Err(Error::Conflict(conflict)) => {
            println!("editor B lost the race: {conflict}");
            let dropped = repo.discard(&mut b)?;
            println!("editor B discarded {} pending events", dropped.len());
        }
        other => println!("unexpected outcome: {other:?}"),
    }

    let user: User = repo.load("42")?;
    println!("final name '{}' at version {}", user.state().name, user.version());
    Ok(())
}
