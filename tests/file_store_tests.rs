mod common;

use common::{dummy_event, dummy_events};
use docfold::{EventStore, FileStore, LockMode, stream_hash};
use std::fs;
use std::io::{ErrorKind, Write};
use tempfile::tempdir;

#[test]
fn test_open_creates_directory() {
    let dir = tempdir().unwrap();
    let data_dir = dir.path().join("mydata");

    let store = FileStore::open(&data_dir).unwrap();

    assert!(data_dir.exists(), "data directory should be created");
    assert!(
        data_dir.join("streams").is_dir(),
        "streams/ should be created"
    );
    assert_eq!(store.dir(), data_dir.as_path());
    assert_eq!(store.streams_dir(), data_dir.join("streams").as_path());
}

#[test]
fn test_builder_defaults() {
    let dir = tempdir().unwrap();
    let store = FileStore::open(dir.path()).unwrap();
    assert_eq!(store.lock_mode(), LockMode::Exclusive);

    let store = FileStore::builder(dir.path())
        .lock_mode(LockMode::None)
        .sync_writes(false)
        .open()
        .unwrap();
    assert_eq!(store.lock_mode(), LockMode::None);
}

#[test]
fn test_read_does_not_create_files() {
    let dir = tempdir().unwrap();
    let store = FileStore::open(dir.path()).unwrap();

    assert!(store.read("ghost").unwrap().is_empty());
    assert!(!store.stream_path("ghost").exists());
}

#[test]
fn test_stream_file_named_by_hash() {
    let dir = tempdir().unwrap();
    let store = FileStore::open(dir.path()).unwrap();

    store.append("user/42 ünïcode", 0, &[dummy_event("x")]).unwrap();

    let expected = store
        .streams_dir()
        .join(format!("{}.jsonl", stream_hash("user/42 ünïcode")));
    assert_eq!(store.stream_path("user/42 ünïcode"), expected);
    assert!(expected.exists());
    assert_eq!(stream_hash("user/42 ünïcode").len(), 16);
    assert_ne!(stream_hash("a"), stream_hash("b"));
}

#[test]
fn test_one_line_per_batch() {
    let dir = tempdir().unwrap();
    let store = FileStore::open(dir.path()).unwrap();

    store.append("s", 0, &dummy_events(3)).unwrap();
    store.append("s", 3, &dummy_events(2)).unwrap();
    store.append("s", 5, &[]).unwrap();

    let contents = fs::read_to_string(store.stream_path("s")).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 2);

    let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(first["stream"], "s");
    assert_eq!(first["start"], 0);
    assert_eq!(first["events"].as_array().unwrap().len(), 3);

    let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
    assert_eq!(second["start"], 3);
}

#[test]
fn test_persists_across_reopen() {
    let dir = tempdir().unwrap();
    {
        let store = FileStore::open(dir.path()).unwrap();
        store.append("s", 0, &dummy_events(2)).unwrap();
    }

    let store = FileStore::open(dir.path()).unwrap();
    let events = store.read("s").unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].kind, "event_1");

    store.append("s", 2, &[dummy_event("event_2")]).unwrap();
    assert_eq!(store.event_count("s").unwrap(), 3);
}

#[test]
fn test_two_handles_see_each_other() {
    let dir = tempdir().unwrap();
    let a = FileStore::open(dir.path()).unwrap();
    let b = FileStore::open(dir.path()).unwrap();

    a.append("s", 0, &[dummy_event("from_a")]).unwrap();
    let err = b.append("s", 0, &[dummy_event("from_b")]).unwrap_err();
    assert!(matches!(err, docfold::AppendError::Conflict(_)), "got: {err}");

    b.append("s", 1, &[dummy_event("from_b")]).unwrap();
    assert_eq!(a.event_count("s").unwrap(), 2);
}

#[test]
fn test_foreign_batch_rejected() {
    let dir = tempdir().unwrap();
    let store = FileStore::open(dir.path()).unwrap();
    store.append("other", 0, &[dummy_event("x")]).unwrap();

    // Pretend a hash collision put another stream's batch in this file.
    fs::copy(store.stream_path("other"), store.stream_path("mine")).unwrap();

    let err = store.read("mine").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidData);
    assert!(err.to_string().contains("other"), "got: {err}");
}

#[test]
fn test_gap_in_batches_rejected() {
    let dir = tempdir().unwrap();
    let store = FileStore::open(dir.path()).unwrap();
    store.append("s", 0, &dummy_events(2)).unwrap();

    let mut file = fs::OpenOptions::new()
        .append(true)
        .open(store.stream_path("s"))
        .unwrap();
    writeln!(
        file,
        r#"{{"stream":"s","start":7,"events":[{{"kind":"late","data":null,"ts":1}}]}}"#
    )
    .unwrap();

    let err = store.read("s").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidData);
}

#[test]
fn test_corrupt_line_is_an_error() {
    let dir = tempdir().unwrap();
    let store = FileStore::open(dir.path()).unwrap();
    store.append("s", 0, &dummy_events(1)).unwrap();

    let mut file = fs::OpenOptions::new()
        .append(true)
        .open(store.stream_path("s"))
        .unwrap();
    writeln!(file, "this is not json").unwrap();

    let err = store.read("s").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidData);

    let err = store.append("s", 1, &dummy_events(1)).unwrap_err();
    assert!(matches!(err, docfold::AppendError::Io(_)), "got: {err}");
}

#[test]
fn test_blank_lines_skipped() {
    let dir = tempdir().unwrap();
    let store = FileStore::open(dir.path()).unwrap();
    store.append("s", 0, &dummy_events(1)).unwrap();

    let mut file = fs::OpenOptions::new()
        .append(true)
        .open(store.stream_path("s"))
        .unwrap();
    writeln!(file).unwrap();

    assert_eq!(store.read("s").unwrap().len(), 1);
}
