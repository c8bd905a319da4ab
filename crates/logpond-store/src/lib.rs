//! Event storage for logpond.
//!
//! - [`BatchedPublisher`] collects events from every watcher and flushes them
//!   in batches, retrying failed writes.
//! - [`EventRepository`] is the atomic batch write path; [`SegmentRepository`]
//!   keeps events on disk and [`MemoryRepository`] in memory.
//! - [`SegmentReader`] reads committed segments without taking the writer
//!   lock.

pub mod error;
pub mod publisher;
pub mod repository;
pub mod segment;

pub use error::StoreError;
pub use publisher::{BatchedPublisher, FlushStats, FlusherHandle};
pub use repository::{EventRepository, MemoryRepository, Repository};
pub use segment::{read_segment, SegmentReader, SegmentRepository};
