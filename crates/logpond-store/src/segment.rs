//! On-disk event store built from immutable JSON-lines segments.
//!
//! ```text
//!   <dir>/
//!     LOCK                                 held by the single writer
//!     segment-00000000000000000001.jsonl   ids 1..=n
//!     segment-0000000000000000000n.jsonl   ...
//!     .segment-....jsonl.tmp               in-progress write, never read
//! ```
//!
//! Every batch becomes one segment named after its first event id. A
//! segment is written to a hidden temp file, fsynced and then renamed into
//! place, so readers see either the complete batch (every event and every
//! field) or nothing of it. Each line is one tagged record:
//!
//! ```text
//! {"kind":"event","id":1,"source":"app.log","timestamp":"...","raw":"user=alice"}
//! {"kind":"field","event_id":1,"name":"user","value":"alice"}
//! ```
//!
//! On open the writer takes the `LOCK` file, discards leftover temp files
//! and continues numbering after the highest id already committed.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use logpond_core::{Event, EventId, Fields, StoredEvent};

use crate::error::{Result, StoreError};
use crate::repository::EventRepository;

const LOCK_FILE: &str = "LOCK";
const SEGMENT_PREFIX: &str = "segment-";
const SEGMENT_SUFFIX: &str = ".jsonl";
const TEMP_SUFFIX: &str = ".tmp";

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Record<'a> {
    Event {
        id: EventId,
        source: Cow<'a, str>,
        timestamp: DateTime<Utc>,
        raw: Cow<'a, str>,
    },
    Field {
        event_id: EventId,
        name: Cow<'a, str>,
        value: Cow<'a, str>,
    },
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Durable single-writer repository over a segment directory.
#[derive(Debug)]
pub struct SegmentRepository {
    dir: PathBuf,
    /// Next id to hand out. Held for the whole write so batches commit one
    /// at a time and in id order.
    next_id: Arc<Mutex<EventId>>,
    _lock: WriterLock,
}

impl SegmentRepository {
    /// Open (creating if needed) the store in `dir`.
    ///
    /// Fails with [`StoreError::Locked`] while another writer holds the
    /// directory.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::task::spawn_blocking(move || Self::open_blocking(dir))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }

    fn open_blocking(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir)?;
        let lock = WriterLock::acquire(&dir)?;
        remove_temp_files(&dir)?;

        let segments = list_segments(&dir)?;
        let last_id = match segments.last() {
            Some((_, path)) => last_event_id(path)?,
            None => 0,
        };

        info!(
            dir = %dir.display(),
            segments = segments.len(),
            last_id,
            "segment store opened"
        );

        Ok(Self {
            dir,
            next_id: Arc::new(Mutex::new(last_id + 1)),
            _lock: lock,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Read-only view over the same directory.
    pub fn reader(&self) -> SegmentReader {
        SegmentReader::new(&self.dir)
    }
}

impl EventRepository for SegmentRepository {
    /// Commit `events` as a new segment.
    ///
    /// The id counter moves into the blocking write, so a caller that stops
    /// waiting still leaves the counter consistent with what was committed.
    async fn add_batch(&self, events: &[Event]) -> Result<Vec<EventId>> {
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let mut next_id = self.next_id.clone().lock_owned().await;
        let first = *next_id;
        let count = events.len() as EventId;
        let ids: Vec<EventId> = (first..first + count).collect();
        let bytes = encode_segment(&ids, events)?;
        let dir = self.dir.clone();

        tokio::task::spawn_blocking(move || {
            commit_segment(&dir, first, &bytes)?;
            *next_id = first + count;
            Ok::<_, StoreError>(())
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))??;

        debug!(first_id = first, events = events.len(), "segment committed");
        Ok(ids)
    }
}

fn encode_segment(ids: &[EventId], events: &[Event]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for (&id, event) in ids.iter().zip(events) {
        let record = Record::Event {
            id,
            source: Cow::Borrowed(&event.source),
            timestamp: event.timestamp,
            raw: Cow::Borrowed(&event.raw),
        };
        serde_json::to_writer(&mut out, &record)?;
        out.push(b'\n');

        for (name, value) in &event.fields {
            let record = Record::Field {
                event_id: id,
                name: Cow::Borrowed(name),
                value: Cow::Borrowed(value),
            };
            serde_json::to_writer(&mut out, &record)?;
            out.push(b'\n');
        }
    }
    Ok(out)
}

fn commit_segment(dir: &Path, first_id: EventId, bytes: &[u8]) -> Result<()> {
    let name = segment_name(first_id);
    let path = dir.join(&name);
    let temp = dir.join(format!(".{name}{TEMP_SUFFIX}"));

    let written = write_synced(&temp, bytes).and_then(|()| fs::rename(&temp, &path));
    if let Err(err) = written {
        let _ = fs::remove_file(&temp);
        return Err(err.into());
    }

    // The segment is visible from here on; failing now would make the
    // caller retry a batch that is already stored.
    if let Err(err) = sync_dir(dir) {
        warn!(dir = %dir.display(), error = %err, "failed to sync store directory");
    }
    Ok(())
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

fn segment_name(first_id: EventId) -> String {
    format!("{SEGMENT_PREFIX}{first_id:020}{SEGMENT_SUFFIX}")
}

fn parse_segment_name(name: &str) -> Option<EventId> {
    name.strip_prefix(SEGMENT_PREFIX)?
        .strip_suffix(SEGMENT_SUFFIX)?
        .parse()
        .ok()
}

/// Committed segments of `dir`, ordered by first id.
fn list_segments(dir: &Path) -> Result<Vec<(EventId, PathBuf)>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };

    let mut segments = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        if let Some(first_id) = name.to_str().and_then(parse_segment_name) {
            segments.push((first_id, entry.path()));
        }
    }
    segments.sort_unstable_by_key(|(first_id, _)| *first_id);
    Ok(segments)
}

fn remove_temp_files(dir: &Path) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let is_temp = name
            .to_str()
            .is_some_and(|n| n.starts_with('.') && n.ends_with(TEMP_SUFFIX));
        if is_temp {
            warn!(file = %entry.path().display(), "removing unfinished segment");
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

fn last_event_id(path: &Path) -> Result<EventId> {
    read_segment(path)?
        .last()
        .map(|stored| stored.id)
        .ok_or_else(|| StoreError::Corrupt {
            path: path.to_path_buf(),
            reason: "segment holds no events".to_string(),
        })
}

// ---------------------------------------------------------------------------
// Writer lock
// ---------------------------------------------------------------------------

/// Exclusive `LOCK` file, removed again on drop.
#[derive(Debug)]
struct WriterLock {
    path: PathBuf,
}

impl WriterLock {
    fn acquire(dir: &Path) -> Result<Self> {
        let path = dir.join(LOCK_FILE);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                return Err(StoreError::Locked(dir.to_path_buf()));
            }
            Err(err) => return Err(err.into()),
        };
        let lock = Self { path };
        writeln!(file, "{}", std::process::id())?;
        Ok(lock)
    }
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            warn!(file = %self.path.display(), error = %err, "failed to release store lock");
        }
    }
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// Read-only access to committed segments. Needs no lock and never sees a
/// partially written batch.
#[derive(Debug, Clone)]
pub struct SegmentReader {
    dir: PathBuf,
}

impl SegmentReader {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Paths of committed segments in id order.
    pub fn segments(&self) -> Result<Vec<PathBuf>> {
        Ok(list_segments(&self.dir)?
            .into_iter()
            .map(|(_, path)| path)
            .collect())
    }

    /// Every committed event in id order.
    pub fn read_all(&self) -> Result<Vec<StoredEvent>> {
        let mut events = Vec::new();
        for path in self.segments()? {
            events.extend(read_segment(&path)?);
        }
        Ok(events)
    }
}

/// Decode one segment file.
pub fn read_segment(path: &Path) -> Result<Vec<StoredEvent>> {
    let corrupt = |reason: String| StoreError::Corrupt {
        path: path.to_path_buf(),
        reason,
    };

    let reader = BufReader::new(File::open(path)?);
    let mut events: Vec<StoredEvent> = Vec::new();
    let mut index: HashMap<EventId, usize> = HashMap::new();

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: Record<'_> = serde_json::from_str(&line)
            .map_err(|e| corrupt(format!("line {}: {e}", line_no + 1)))?;

        match record {
            Record::Event {
                id,
                source,
                timestamp,
                raw,
            } => {
                index.insert(id, events.len());
                events.push(StoredEvent {
                    id,
                    event: Event {
                        raw: raw.into_owned(),
                        source: source.into_owned(),
                        timestamp,
                        fields: Fields::new(),
                    },
                });
            }
            Record::Field {
                event_id,
                name,
                value,
            } => {
                let slot = index.get(&event_id).copied().ok_or_else(|| {
                    corrupt(format!(
                        "line {}: field {name} refers to unknown event {event_id}",
                        line_no + 1
                    ))
                })?;
                events[slot]
                    .event
                    .fields
                    .insert(name.into_owned(), value.into_owned());
            }
        }
    }
    Ok(events)
}
