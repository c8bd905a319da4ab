//! logpond-feeds: per-file tailing for logpond.
//!
//! Each monitored file gets one [`FileWatcher`] running as its own task. A
//! watcher reads newly appended bytes on every poll tick, cuts them into raw
//! events on the file's delimiter, enriches each one with the shared
//! [`FieldExtractor`](logpond_core::FieldExtractor) and publishes it to an
//! [`EventSink`](logpond_core::EventSink).

pub mod error;
pub mod split;
pub mod watcher;

pub use error::WatcherError;
pub use split::{split_events, Split};
pub use watcher::{ExitReason, FileWatcher, RunState, WatcherCommand, WatcherExit, WatcherState};
