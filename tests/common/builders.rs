//! Test builders: ergonomic constructors for events, file configs and
//! running pipelines.
//!
//! These builders are designed for readability in test assertions, not for
//! production use. They panic on invalid input rather than returning `Result`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use logpond::core::{Event, Fields, IndexedFileConfig, PublisherConfig, TimeLayout};

// ---------------------------------------------------------------------------
// EventBuilder
// ---------------------------------------------------------------------------

/// Fluent builder for [`Event`] fixtures.
///
/// ```rust
/// let event = EventBuilder::new("user=alice action=login")
///     .source("/var/log/auth.log")
///     .field("user", "alice")
///     .build();
/// ```
pub struct EventBuilder {
    raw: String,
    source: String,
    timestamp: DateTime<Utc>,
    fields: Fields,
}

impl EventBuilder {
    pub fn new(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            source: "test.log".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap(),
            fields: Fields::new(),
        }
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn build(self) -> Event {
        Event {
            raw: self.raw,
            source: self.source,
            timestamp: self.timestamp,
            fields: self.fields,
        }
    }
}

/// `n` distinct events named `"{prefix}-{i}"`.
pub fn events(prefix: &str, n: usize) -> Vec<Event> {
    (0..n)
        .map(|i| EventBuilder::new(format!("{prefix}-{i}")).build())
        .collect()
}

// ---------------------------------------------------------------------------
// Config builders
// ---------------------------------------------------------------------------

/// Newline-delimited file config with the default layout and a short poll
/// interval.
pub fn file_config(path: impl AsRef<Path>) -> Arc<IndexedFileConfig> {
    file_config_with(path, "\n", Duration::from_millis(20))
}

pub fn file_config_with(
    path: impl AsRef<Path>,
    delimiter: &str,
    poll_interval: Duration,
) -> Arc<IndexedFileConfig> {
    let layout = TimeLayout::parse_layout("2006/01/02 15:04:05").unwrap();
    Arc::new(
        IndexedFileConfig::new(
            path.as_ref().to_string_lossy(),
            delimiter,
            poll_interval,
            layout,
        )
        .unwrap(),
    )
}

/// Publisher limits suited to tests: small batches, short delays and
/// backoffs.
pub fn publisher_config(max_batch_size: usize, max_buffered_events: usize) -> PublisherConfig {
    PublisherConfig {
        max_batch_size,
        max_batch_delay: Duration::from_millis(50),
        max_buffered_events,
        retry_initial_backoff: Duration::from_millis(10),
        retry_max_backoff: Duration::from_millis(40),
        shutdown_flush_attempts: 3,
    }
}
