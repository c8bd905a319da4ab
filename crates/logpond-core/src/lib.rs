//! logpond-core: shared types, configuration and field extraction.
//!
//! # Architecture
//!
//! ```text
//! File ──► Watcher ──► FieldExtractor ──► BatchedPublisher ──► EventRepository
//!          (feeds)        (core)              (store)              (store)
//! ```
//!
//! This crate holds everything the other layers agree on: the event data
//! model, the immutable runtime [`Config`], timestamp layouts and the
//! stateless [`FieldExtractor`].

pub mod config;
pub mod error;
pub mod extract;
pub mod sink;
pub mod time_layout;
pub mod types;

pub use config::{Config, IndexedFileConfig, PublisherConfig, Settings, StoreConfig, StoreLocation};
pub use error::ConfigError;
pub use extract::{ExtractionRule, FieldExtractor};
pub use sink::EventSink;
pub use time_layout::TimeLayout;
pub use types::{Event, EventId, Fields, RawEvent, StoredEvent, TIME_FIELD};
