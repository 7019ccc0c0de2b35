use crate::event::Event;
use crate::store::{AppendError, AppendResult, ConcurrencyConflict, EventStore};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// How a [`FileStore`] coordinates access to stream files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockMode {
    /// Take an exclusive advisory lock for every append and a shared lock
    /// for every read. Safe with many writers across threads and processes.
    #[default]
    Exclusive,
    /// No locking. Only correct when a single writer touches the directory.
    None,
}

/// Compute the xxh64 hash of a stream id, hex-encoded.
///
/// Used as the stream's file name so arbitrary ids map to safe paths.
pub fn stream_hash(stream_id: &str) -> String {
    let hash = xxhash_rust::xxh64::xxh64(stream_id.as_bytes(), 0);
    format!("{:016x}", hash)
}

/// One committed batch as written to disk.
#[derive(Serialize)]
struct CommitRef<'a> {
    stream: &'a str,
    start: u64,
    events: &'a [Event],
}

/// One committed batch as read back.
#[derive(Deserialize)]
struct Commit {
    stream: String,
    start: u64,
    events: Vec<Event>,
}

/// Builder for [`FileStore`].
#[derive(Debug, Clone)]
pub struct FileStoreBuilder {
    dir: PathBuf,
    lock_mode: LockMode,
    sync_writes: bool,
}

impl FileStoreBuilder {
    /// Set the locking strategy. Defaults to [`LockMode::Exclusive`].
    pub fn lock_mode(mut self, mode: LockMode) -> Self {
        self.lock_mode = mode;
        self
    }

    /// Whether each append calls `sync_data` before reporting success.
    /// Defaults to `true`.
    pub fn sync_writes(mut self, sync: bool) -> Self {
        self.sync_writes = sync;
        self
    }

    /// Create the directory layout and open the store.
    pub fn open(self) -> io::Result<FileStore> {
        let streams_dir = self.dir.join("streams");
        fs::create_dir_all(&streams_dir)?;

        Ok(FileStore {
            dir: self.dir,
            streams_dir,
            lock_mode: self.lock_mode,
            sync_writes: self.sync_writes,
        })
    }
}

/// A durable event store backed by one JSONL file per stream.
///
/// Every append writes its whole batch as a single line:
///
/// ```text
/// {"stream":"user-42","start":1,"events":[{"kind":"name_changed","data":{"name":"Ann"},"ts":1700000000}]}
/// ```
///
/// A batch only counts as committed once its trailing newline is on disk, so
/// a crash mid-write leaves a torn final line that readers skip and the next
/// append discards. Stream files live under `streams/`, named by
/// [`stream_hash`].
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
    streams_dir: PathBuf,
    lock_mode: LockMode,
    sync_writes: bool,
}

impl FileStore {
    /// Open or create a store in `dir` with default settings.
    pub fn open(dir: impl AsRef<Path>) -> io::Result<Self> {
        Self::builder(dir).open()
    }

    /// Start configuring a store rooted at `dir`.
    pub fn builder(dir: impl AsRef<Path>) -> FileStoreBuilder {
        FileStoreBuilder {
            dir: dir.as_ref().to_path_buf(),
            lock_mode: LockMode::default(),
            sync_writes: true,
        }
    }

    /// Returns the path to the data directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the directory holding stream files.
    pub fn streams_dir(&self) -> &Path {
        &self.streams_dir
    }

    /// Returns the file backing `stream_id`. The file may not exist yet.
    pub fn stream_path(&self, stream_id: &str) -> PathBuf {
        self.streams_dir
            .join(format!("{}.jsonl", stream_hash(stream_id)))
    }

    /// Returns the configured lock mode.
    pub fn lock_mode(&self) -> LockMode {
        self.lock_mode
    }

    fn scan_existing(&self, stream_id: &str) -> io::Result<Option<StreamScan>> {
        let file = match File::open(self.stream_path(stream_id)) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        if self.lock_mode == LockMode::Exclusive {
            FileExt::lock_shared(&file)?;
        }
        // The lock is released when `file` is dropped.
        scan(&file, stream_id).map(Some)
    }
}

impl EventStore for FileStore {
    fn read(&self, stream_id: &str) -> io::Result<Vec<Event>> {
        Ok(self
            .scan_existing(stream_id)?
            .map(|scan| scan.events)
            .unwrap_or_default())
    }

    fn append(
        &self,
        stream_id: &str,
        expected_count: u64,
        events: &[Event],
    ) -> Result<AppendResult, AppendError> {
        if events.is_empty() {
            let actual_count = self.event_count(stream_id)?;
            check_count(stream_id, expected_count, actual_count)?;
            return Ok(AppendResult {
                previous_count: actual_count,
                new_count: actual_count,
            });
        }

        let path = self.stream_path(stream_id);
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        if self.lock_mode == LockMode::Exclusive {
            FileExt::lock_exclusive(&file)?;
        }

        let scan = scan(&file, stream_id)?;
        if scan.file_len > scan.committed_len {
            log::warn!(
                "docfold: stream '{}': discarding {} bytes of uncommitted data in {}",
                stream_id,
                scan.file_len - scan.committed_len,
                path.display()
            );
            file.set_len(scan.committed_len)?;
        }

        let actual_count = scan.events.len() as u64;
        check_count(stream_id, expected_count, actual_count)?;

        let mut line = serde_json::to_vec(&CommitRef {
            stream: stream_id,
            start: actual_count,
            events,
        })
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        line.push(b'\n');

        let written = file.write_all(&line).and_then(|()| {
            if self.sync_writes {
                file.sync_data()
            } else {
                Ok(())
            }
        });
        if let Err(e) = written {
            // Never leave half a batch behind.
            if let Err(rollback) = file.set_len(scan.committed_len) {
                log::error!(
                    "docfold: stream '{}': failed to roll back partial append: {}",
                    stream_id,
                    rollback
                );
            }
            return Err(e.into());
        }

        let new_count = actual_count + events.len() as u64;
        log::debug!(
            "docfold: stream '{}': appended {} events ({} -> {})",
            stream_id,
            events.len(),
            actual_count,
            new_count
        );

        Ok(AppendResult {
            previous_count: actual_count,
            new_count,
        })
    }

    fn event_count(&self, stream_id: &str) -> io::Result<u64> {
        Ok(self
            .scan_existing(stream_id)?
            .map_or(0, |scan| scan.events.len() as u64))
    }
}

fn check_count(stream_id: &str, expected_count: u64, actual_count: u64) -> Result<(), AppendError> {
    if expected_count == actual_count {
        return Ok(());
    }
    log::debug!(
        "docfold: stream '{}': expected {} events, found {}",
        stream_id,
        expected_count,
        actual_count
    );
    Err(AppendError::Conflict(ConcurrencyConflict {
        stream_id: stream_id.to_string(),
        expected_count,
        actual_count,
    }))
}

struct StreamScan {
    events: Vec<Event>,
    /// Byte length covered by complete lines.
    committed_len: u64,
    file_len: u64,
}

/// Read every committed batch of a stream file from the start.
fn scan(file: &File, stream_id: &str) -> io::Result<StreamScan> {
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    reader.seek(SeekFrom::Start(0))?;

    let commits = CommitIterator {
        reader,
        buf: Vec::new(),
        pos: 0,
    };

    let mut events = Vec::new();
    let mut committed_len = 0;
    for result in commits {
        let (commit, next_pos) = result?;

        if commit.stream != stream_id {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "stream file for '{}' contains a batch for '{}'",
                    stream_id, commit.stream
                ),
            ));
        }
        if commit.start != events.len() as u64 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "stream '{}': batch at byte {} starts at event {}, expected {}",
                    stream_id,
                    committed_len,
                    commit.start,
                    events.len()
                ),
            ));
        }

        events.extend(commit.events);
        committed_len = next_pos;
    }

    Ok(StreamScan {
        events,
        committed_len,
        file_len,
    })
}

struct CommitIterator<R> {
    reader: R,
    buf: Vec<u8>,
    pos: u64,
}

impl<R: BufRead> Iterator for CommitIterator<R> {
    type Item = io::Result<(Commit, u64)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buf.clear();
            let read = match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(n) => n as u64,
                Err(e) => return Some(Err(e)),
            };

            // Bytes reaching EOF without a newline are a torn write. They may
            // end mid-character, so nothing is decoded before this check.
            if read == 0 || self.buf.last() != Some(&b'\n') {
                return None;
            }

            let next_pos = self.pos + read;
            self.pos = next_pos;

            let line = &self.buf[..self.buf.len() - 1];
            if line.is_empty() {
                continue;
            }

            let commit: Commit = match serde_json::from_slice(line) {
                Ok(c) => c,
                Err(e) => {
                    return Some(Err(io::Error::new(io::ErrorKind::InvalidData, e)));
                }
            };
            return Some(Ok((commit, next_pos)));
        }
    }
}
