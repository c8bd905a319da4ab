//! Repository doubles for publisher and pipeline harnesses.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use logpond::core::{Event, EventId, StoredEvent};
use logpond::store::{EventRepository, MemoryRepository, StoreError};

/// Fails the first `failures` calls with an I/O error, then stores into
/// memory. Records every call it receives.
#[derive(Default)]
pub struct FlakyRepository {
    failures: u32,
    calls: AtomicU32,
    attempted: Mutex<Vec<Vec<String>>>,
    inner: MemoryRepository,
}

impl FlakyRepository {
    pub fn failing(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            failures,
            ..Default::default()
        })
    }

    pub fn reliable() -> Arc<Self> {
        Self::failing(0)
    }

    /// Number of `add_batch` calls so far, failed ones included.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Raw texts of every attempted batch, in call order.
    pub fn attempted(&self) -> Vec<Vec<String>> {
        self.attempted.lock().unwrap().clone()
    }

    pub fn stored(&self) -> Vec<StoredEvent> {
        self.inner.events()
    }
}

impl EventRepository for FlakyRepository {
    async fn add_batch(&self, events: &[Event]) -> Result<Vec<EventId>, StoreError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.attempted
            .lock()
            .unwrap()
            .push(events.iter().map(|e| e.raw.clone()).collect());
        if call < self.failures {
            return Err(StoreError::Io(std::io::Error::other("injected failure")));
        }
        self.inner.add_batch(events).await
    }
}
