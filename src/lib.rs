//! logpond: tail log files, extract fields and store the resulting events.
//!
//! # Architecture
//!
//! ```text
//!   files ──► FileWatcher ×N ──► FieldExtractor ──► BatchedPublisher ──► EventRepository
//!              (feeds)             (core)              (store)             (store)
//!                 ▲
//!              Ingestor (this crate): opens files, owns command senders,
//!              reports watcher terminations
//! ```
//!
//! The layers live in their own crates and are re-exported here so the
//! binary, the integration harnesses and the benches can reach them through
//! one dependency.

pub mod ingestor;

pub use ingestor::{Ingestor, WatcherReport};
pub use logpond_core as core;
pub use logpond_feeds as feeds;
pub use logpond_store as store;
