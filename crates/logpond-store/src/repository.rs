//! Write path of the event store.
//!
//! An [`EventRepository`] takes a batch of events and makes all of them
//! durable together: either every event of the batch (with all of its
//! fields) becomes visible to readers, or none does. Identifiers are handed
//! out in batch order and are unique for the lifetime of the store.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use logpond_core::{Event, EventId, StoreConfig, StoreLocation, StoredEvent};

use crate::error::Result;
use crate::segment::SegmentRepository;

/// Atomic, single-writer batch insertion.
pub trait EventRepository: Send + Sync + 'static {
    /// Persist `events` as one unit and return their ids in input order.
    ///
    /// On error nothing of the batch is visible and the same batch may be
    /// retried. An empty batch succeeds without touching storage.
    fn add_batch(&self, events: &[Event]) -> impl Future<Output = Result<Vec<EventId>>> + Send;
}

impl<T: EventRepository> EventRepository for Arc<T> {
    fn add_batch(&self, events: &[Event]) -> impl Future<Output = Result<Vec<EventId>>> + Send {
        (**self).add_batch(events)
    }
}

// ---------------------------------------------------------------------------
// In-memory repository
// ---------------------------------------------------------------------------

/// Volatile repository used for `:memory:` stores and tests.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    last_id: EventId,
    events: Vec<StoredEvent>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored event in id order.
    pub fn events(&self) -> Vec<StoredEvent> {
        self.lock().events.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EventRepository for MemoryRepository {
    async fn add_batch(&self, events: &[Event]) -> Result<Vec<EventId>> {
        let mut state = self.lock();
        let first = state.last_id + 1;
        let ids: Vec<EventId> = (first..first + events.len() as EventId).collect();
        state.events.extend(
            ids.iter()
                .zip(events)
                .map(|(&id, event)| StoredEvent { id, event: event.clone() }),
        );
        state.last_id += events.len() as EventId;
        Ok(ids)
    }
}

// ---------------------------------------------------------------------------
// Runtime selection
// ---------------------------------------------------------------------------

/// Repository chosen from the store configuration at startup.
#[derive(Debug)]
pub enum Repository {
    Memory(MemoryRepository),
    Segments(SegmentRepository),
}

impl Repository {
    /// Open the repository named by `config`, taking the writer lock for
    /// on-disk stores.
    pub async fn open(config: &StoreConfig) -> Result<Self> {
        match &config.location {
            StoreLocation::Memory => Ok(Self::Memory(MemoryRepository::new())),
            StoreLocation::Directory(dir) => Ok(Self::Segments(SegmentRepository::open(dir).await?)),
        }
    }
}

impl EventRepository for Repository {
    async fn add_batch(&self, events: &[Event]) -> Result<Vec<EventId>> {
        match self {
            Self::Memory(repo) => repo.add_batch(events).await,
            Self::Segments(repo) => repo.add_batch(events).await,
        }
    }
}
