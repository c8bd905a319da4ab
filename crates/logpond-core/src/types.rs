//! Core types for logpond-core.
//!
//! This module defines the data that flows through the ingestion pipeline:
//! the transient [`RawEvent`] cut out of a file by a watcher, the enriched
//! [`Event`] produced by the field extractor, and the [`StoredEvent`] that a
//! repository hands back once an event is durable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Field mapping of one event. Ordered by name so stored records are stable.
pub type Fields = BTreeMap<String, String>;

/// Repository-issued identifier of a durable event.
pub type EventId = u64;

/// Name of the field whose value, when present, becomes the event timestamp.
pub const TIME_FIELD: &str = "_time";

/// One delimited span of log text as read from a file.
///
/// Never persisted as-is; the field extractor turns it into an [`Event`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    /// Text between two delimiter matches (UTF-8 lossy converted). Never
    /// includes the delimiter itself.
    pub raw: String,
    /// Identity of the file this span came from (its configured filename).
    pub source: String,
    /// Wall-clock time the bytes were read.
    pub read_at: DateTime<Utc>,
}

impl RawEvent {
    pub fn new(raw: impl Into<String>, source: impl Into<String>, read_at: DateTime<Utc>) -> Self {
        Self {
            raw: raw.into(),
            source: source.into(),
            read_at,
        }
    }
}

/// A field-enriched event waiting to be written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub raw: String,
    pub source: String,
    /// Parsed `_time` when available, otherwise the read time.
    pub timestamp: DateTime<Utc>,
    pub fields: Fields,
}

impl Event {
    /// Value of a field, if extracted.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// An event read back from a repository, together with its identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEvent {
    pub id: EventId,
    pub event: Event,
}
