//! Configuration types for logpond.
//!
//! Configuration is handled in two stages. [`Settings`] is the raw,
//! deserialised view: built-in defaults, layered under an optional TOML file
//! and `LOGPOND__*` environment variables. [`Settings::compile`] validates it
//! once and produces the immutable [`Config`] (compiled regexes, resolved
//! extraction rules and parsed time layouts), which is then shared with every
//! component and never mutated again.
//!
//! # Example
//!
//! ```toml
//! [store]
//! path = "logpond-data"
//!
//! [extraction]
//! time_layout = "2006/01/02 15:04:05"
//! rules = ['(\w+)=(\w+)']
//!
//! [[files]]
//! filename = "/var/log/app.log"
//! delimiter = "\n"
//! poll_interval_ms = 1000
//! ```

use regex::bytes::Regex as BytesRegex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ConfigError, Result};
use crate::extract::FieldExtractor;
use crate::time_layout::TimeLayout;

// ---------------------------------------------------------------------------
// Embedded defaults
// ---------------------------------------------------------------------------

const DEFAULT_CONFIG: &str = r#"
[store]
path = "logpond-data"

[publisher]
max_batch_size           = 1000
max_batch_delay_ms       = 1000
max_buffered_events      = 10000
retry_initial_backoff_ms = 100
retry_max_backoff_ms     = 5000
shutdown_flush_attempts  = 5

[extraction]
time_layout = "2006/01/02 15:04:05"
rules = [
    '(\w+)=(\w+)',
    '^(?P<_time>\d\d\d\d/\d\d/\d\d \d\d:\d\d:\d\d(?:\.\d+)?)',
]
"#;

/// Store path that selects the in-memory repository.
pub const MEMORY_STORE: &str = ":memory:";

/// Upper bound on bytes a watcher reads from its file in one poll tick.
pub const DEFAULT_MAX_READ_BYTES: usize = 8 * 1024 * 1024;

/// Longest unterminated span a watcher holds before emitting it as an event.
pub const DEFAULT_MAX_EVENT_BYTES: usize = 16 * 1024 * 1024;

/// Transient read failures tolerated in a row before a watcher gives up.
pub const DEFAULT_MAX_CONSECUTIVE_READ_ERRORS: u32 = 30;

// ---------------------------------------------------------------------------
// Raw settings
// ---------------------------------------------------------------------------

/// Raw configuration as deserialised from defaults, file and environment.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub publisher: PublisherSettings,
    #[serde(default)]
    pub extraction: ExtractionSettings,
    #[serde(default)]
    pub files: Vec<FileSettings>,
}

/// `[store]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreSettings {
    #[serde(default = "default_store_path")]
    pub path: String,
}

fn default_store_path() -> String { "logpond-data".to_string() }

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

/// `[publisher]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct PublisherSettings {
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default = "default_max_batch_delay_ms")]
    pub max_batch_delay_ms: u64,
    #[serde(default = "default_max_buffered_events")]
    pub max_buffered_events: usize,
    #[serde(default = "default_retry_initial_backoff_ms")]
    pub retry_initial_backoff_ms: u64,
    #[serde(default = "default_retry_max_backoff_ms")]
    pub retry_max_backoff_ms: u64,
    #[serde(default = "default_shutdown_flush_attempts")]
    pub shutdown_flush_attempts: u32,
}

fn default_max_batch_size() -> usize { 1000 }
fn default_max_batch_delay_ms() -> u64 { 1000 }
fn default_max_buffered_events() -> usize { 10_000 }
fn default_retry_initial_backoff_ms() -> u64 { 100 }
fn default_retry_max_backoff_ms() -> u64 { 5000 }
fn default_shutdown_flush_attempts() -> u32 { 5 }

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            max_batch_delay_ms: default_max_batch_delay_ms(),
            max_buffered_events: default_max_buffered_events(),
            retry_initial_backoff_ms: default_retry_initial_backoff_ms(),
            retry_max_backoff_ms: default_retry_max_backoff_ms(),
            shutdown_flush_attempts: default_shutdown_flush_attempts(),
        }
    }
}

/// `[extraction]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionSettings {
    #[serde(default = "default_time_layout")]
    pub time_layout: String,
    #[serde(default = "default_rules")]
    pub rules: Vec<String>,
}

fn default_time_layout() -> String { "2006/01/02 15:04:05".to_string() }
fn default_rules() -> Vec<String> {
    crate::extract::DEFAULT_RULES.iter().map(|r| r.to_string()).collect()
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            time_layout: default_time_layout(),
            rules: default_rules(),
        }
    }
}

/// One `[[files]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct FileSettings {
    pub filename: String,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Falls back to `extraction.time_layout` when unset.
    #[serde(default)]
    pub time_layout: Option<String>,
    #[serde(default)]
    pub max_read_bytes: Option<usize>,
    #[serde(default)]
    pub max_event_bytes: Option<usize>,
    #[serde(default)]
    pub max_consecutive_read_errors: Option<u32>,
}

fn default_delimiter() -> String { "\n".to_string() }
fn default_poll_interval_ms() -> u64 { 1000 }

impl FileSettings {
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            delimiter: default_delimiter(),
            poll_interval_ms: default_poll_interval_ms(),
            time_layout: None,
            max_read_bytes: None,
            max_event_bytes: None,
            max_consecutive_read_errors: None,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::defaults()
    }
}

/// `LOGPOND__PUBLISHER__MAX_BATCH_SIZE=500` sets `publisher.max_batch_size`.
fn environment() -> config::Environment {
    config::Environment::with_prefix("LOGPOND")
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}

impl Settings {
    /// Load the built-in defaults, then `path` (if given, it must exist),
    /// then `LOGPOND__SECTION__KEY` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, environment())
    }

    fn load_with_env(path: Option<&Path>, env: config::Environment) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Toml));
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder
            .add_source(env)
            .build()?
            .try_deserialize()
            .map_err(Into::into)
    }

    /// Return the built-in defaults without touching the filesystem.
    pub fn defaults() -> Self {
        config::Config::builder()
            .add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Toml))
            .build()
            .expect("built-in default config must be valid TOML")
            .try_deserialize()
            .expect("built-in default config must deserialize correctly")
    }

    /// Validate everything and build the immutable runtime [`Config`].
    pub fn compile(&self) -> Result<Config> {
        let extractor = FieldExtractor::from_patterns(&self.extraction.rules)?;
        let time_layout = TimeLayout::parse_layout(&self.extraction.time_layout)?;
        let publisher = PublisherConfig::try_from(&self.publisher)?;

        let files = self
            .files
            .iter()
            .map(|file| {
                let layout = match &file.time_layout {
                    Some(layout) => TimeLayout::parse_layout(layout)?,
                    None => time_layout.clone(),
                };
                let indexed = IndexedFileConfig::new(
                    &file.filename,
                    &file.delimiter,
                    Duration::from_millis(file.poll_interval_ms),
                    layout,
                )?
                .with_max_read_bytes(file.max_read_bytes.unwrap_or(DEFAULT_MAX_READ_BYTES))?
                .with_max_event_bytes(file.max_event_bytes.unwrap_or(DEFAULT_MAX_EVENT_BYTES))?
                .with_max_consecutive_read_errors(
                    file.max_consecutive_read_errors
                        .unwrap_or(DEFAULT_MAX_CONSECUTIVE_READ_ERRORS),
                );
                Ok(Arc::new(indexed))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Config {
            store: StoreConfig::from_path(&self.store.path)?,
            publisher,
            extractor: Arc::new(extractor),
            time_layout,
            files,
        })
    }
}

// ---------------------------------------------------------------------------
// Compiled configuration
// ---------------------------------------------------------------------------

/// Validated, immutable runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub store: StoreConfig,
    pub publisher: PublisherConfig,
    pub extractor: Arc<FieldExtractor>,
    /// Global `_time` layout; files without their own layout use this one.
    pub time_layout: TimeLayout,
    pub files: Vec<Arc<IndexedFileConfig>>,
}

/// Where the event repository keeps its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    Memory,
    Directory(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub location: StoreLocation,
}

impl StoreConfig {
    pub fn from_path(path: &str) -> Result<Self> {
        let location = match path.trim() {
            "" => return Err(ConfigError::invalid("store.path", "must not be empty")),
            MEMORY_STORE => StoreLocation::Memory,
            dir => StoreLocation::Directory(PathBuf::from(dir)),
        };
        Ok(Self { location })
    }
}

/// Batching and retry limits of the batched publisher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherConfig {
    /// Buffer length that triggers a flush.
    pub max_batch_size: usize,
    /// Longest time the first unflushed event may wait.
    pub max_batch_delay: Duration,
    /// Buffered plus in-flight events before `publish` blocks.
    pub max_buffered_events: usize,
    pub retry_initial_backoff: Duration,
    pub retry_max_backoff: Duration,
    /// Flush attempts made for the final batch at shutdown.
    pub shutdown_flush_attempts: u32,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self::try_from(&PublisherSettings::default())
            .expect("default publisher settings must be valid")
    }
}

impl TryFrom<&PublisherSettings> for PublisherConfig {
    type Error = ConfigError;

    fn try_from(s: &PublisherSettings) -> Result<Self> {
        if s.max_batch_size == 0 {
            return Err(ConfigError::invalid("publisher.max_batch_size", "must be at least 1"));
        }
        if s.max_buffered_events < s.max_batch_size {
            return Err(ConfigError::invalid(
                "publisher.max_buffered_events",
                format!("must be at least max_batch_size ({})", s.max_batch_size),
            ));
        }
        if s.retry_initial_backoff_ms == 0 {
            return Err(ConfigError::invalid(
                "publisher.retry_initial_backoff_ms",
                "must be at least 1",
            ));
        }
        if s.retry_max_backoff_ms < s.retry_initial_backoff_ms {
            return Err(ConfigError::invalid(
                "publisher.retry_max_backoff_ms",
                "must not be below retry_initial_backoff_ms",
            ));
        }
        if s.shutdown_flush_attempts == 0 {
            return Err(ConfigError::invalid(
                "publisher.shutdown_flush_attempts",
                "must be at least 1",
            ));
        }
        Ok(Self {
            max_batch_size: s.max_batch_size,
            max_batch_delay: Duration::from_millis(s.max_batch_delay_ms),
            max_buffered_events: s.max_buffered_events,
            retry_initial_backoff: Duration::from_millis(s.retry_initial_backoff_ms),
            retry_max_backoff: Duration::from_millis(s.retry_max_backoff_ms),
            shutdown_flush_attempts: s.shutdown_flush_attempts,
        })
    }
}

/// Everything a watcher needs to know about the file it tails.
#[derive(Debug, Clone)]
pub struct IndexedFileConfig {
    pub filename: String,
    pub delimiter: BytesRegex,
    pub poll_interval: Duration,
    pub time_layout: TimeLayout,
    pub max_read_bytes: usize,
    /// Pending bytes without a delimiter beyond this are emitted as one event.
    pub max_event_bytes: usize,
    pub max_consecutive_read_errors: u32,
}

impl IndexedFileConfig {
    pub fn new(
        filename: impl Into<String>,
        delimiter: &str,
        poll_interval: Duration,
        time_layout: TimeLayout,
    ) -> Result<Self> {
        let filename = filename.into();
        if filename.trim().is_empty() {
            return Err(ConfigError::invalid("files.filename", "must not be empty"));
        }
        if poll_interval.is_zero() {
            return Err(ConfigError::invalid(
                "files.poll_interval_ms",
                format!("must be at least 1 for {filename}"),
            ));
        }
        let delimiter_regex = BytesRegex::new(delimiter).map_err(|source| ConfigError::Regex {
            pattern: delimiter.to_string(),
            source,
        })?;
        if delimiter_regex.is_match(b"") {
            return Err(ConfigError::EmptyDelimiter(delimiter.to_string()));
        }
        Ok(Self {
            filename,
            delimiter: delimiter_regex,
            poll_interval,
            time_layout,
            max_read_bytes: DEFAULT_MAX_READ_BYTES,
            max_event_bytes: DEFAULT_MAX_EVENT_BYTES,
            max_consecutive_read_errors: DEFAULT_MAX_CONSECUTIVE_READ_ERRORS,
        })
    }

    pub fn with_max_read_bytes(mut self, max_read_bytes: usize) -> Result<Self> {
        if max_read_bytes == 0 {
            return Err(ConfigError::invalid("files.max_read_bytes", "must be at least 1"));
        }
        self.max_read_bytes = max_read_bytes;
        Ok(self)
    }

    pub fn with_max_event_bytes(mut self, max_event_bytes: usize) -> Result<Self> {
        if max_event_bytes == 0 {
            return Err(ConfigError::invalid("files.max_event_bytes", "must be at least 1"));
        }
        self.max_event_bytes = max_event_bytes;
        Ok(self)
    }

    pub fn with_max_consecutive_read_errors(mut self, limit: u32) -> Self {
        self.max_consecutive_read_errors = limit;
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
