//! Batched publisher: buffers events from every watcher and writes them to
//! the repository in batches.
//!
//! ```text
//!   watcher ──┐                       ┌─────────────┐
//!   watcher ──┼── publish() ──► buffer│ flusher task│──► add_batch()
//!   watcher ──┘     │                 └─────────────┘        │
//!                   └── waits for capacity ◄── released ─────┘
//! ```
//!
//! A flush starts when the buffer reaches `max_batch_size` events or when the
//! oldest buffered event has waited `max_batch_delay`, whichever comes
//! first. Only the single flusher task talks to the repository, so exactly
//! one flush is in flight at a time and batches reach storage in publish
//! order.
//!
//! A failed flush keeps its batch and is retried with exponential backoff
//! until it succeeds; nothing is dropped. Capacity is counted in events and
//! covers both the buffer and the batch being flushed, so while storage is
//! failing producers eventually block in [`BatchedPublisher::publish`]
//! instead of growing memory without bound.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use logpond_core::{Event, EventSink, PublisherConfig};

use crate::repository::EventRepository;

#[derive(Debug, Default)]
struct Buffer {
    events: Vec<Event>,
    /// When the oldest buffered event arrived.
    first_at: Option<Instant>,
}

#[derive(Debug)]
struct Shared {
    config: PublisherConfig,
    buffer: Mutex<Buffer>,
    /// Wakes the flusher when the buffer becomes non-empty or full.
    wake: Notify,
    capacity: Semaphore,
    published: AtomicU64,
}

impl Shared {
    fn buffer(&self) -> MutexGuard<'_, Buffer> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the whole buffer, leaving it empty.
    fn take(&self) -> Vec<Event> {
        let mut buffer = self.buffer();
        buffer.first_at = None;
        std::mem::take(&mut buffer.events)
    }

    /// `(flush due now, deadline of the oldest event)`.
    fn due(&self) -> (bool, Option<Instant>) {
        let buffer = self.buffer();
        let deadline = buffer.first_at.map(|t| t + self.config.max_batch_delay);
        let full = buffer.events.len() >= self.config.max_batch_size;
        let expired = deadline.is_some_and(|d| Instant::now() >= d);
        (full || expired, deadline)
    }
}

/// Counters reported by the flusher when it stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    /// Batches written successfully.
    pub batches: u64,
    /// Events written successfully.
    pub events: u64,
    /// Failed `add_batch` calls, including ones later retried successfully.
    pub failed_attempts: u64,
    /// Events given up on during shutdown.
    pub lost: u64,
}

/// Cloneable handle used by producers.
#[derive(Debug, Clone)]
pub struct BatchedPublisher {
    shared: Arc<Shared>,
}

/// Owner of the flusher task.
#[derive(Debug)]
pub struct FlusherHandle {
    shared: Arc<Shared>,
    shutdown: CancellationToken,
    task: JoinHandle<FlushStats>,
}

impl BatchedPublisher {
    /// Start the flusher task on the current runtime.
    pub fn spawn<R: EventRepository>(config: PublisherConfig, repository: R) -> (Self, FlusherHandle) {
        let shared = Arc::new(Shared {
            capacity: Semaphore::new(config.max_buffered_events),
            config,
            buffer: Mutex::new(Buffer::default()),
            wake: Notify::new(),
            published: AtomicU64::new(0),
        });
        let shutdown = CancellationToken::new();

        let flusher = Flusher {
            shared: shared.clone(),
            repository,
            shutdown: shutdown.clone(),
            stats: FlushStats::default(),
        };
        let task = tokio::spawn(flusher.run());

        (
            Self {
                shared: shared.clone(),
            },
            FlusherHandle {
                shared,
                shutdown,
                task,
            },
        )
    }

    /// Buffer one event, waiting while the publisher is at capacity.
    ///
    /// Once the flusher has shut down the event is dropped with a warning.
    pub async fn publish(&self, event: Event) {
        match self.shared.capacity.acquire().await {
            Ok(permit) => permit.forget(),
            Err(_) => {
                warn!(source = %event.source, "publisher is shut down, dropping event");
                return;
            }
        }

        let wake = {
            let mut buffer = self.shared.buffer();
            if buffer.events.is_empty() {
                buffer.first_at = Some(Instant::now());
            }
            buffer.events.push(event);
            buffer.events.len() == 1 || buffer.events.len() >= self.shared.config.max_batch_size
        };
        self.shared.published.fetch_add(1, Ordering::Relaxed);

        if wake {
            self.shared.wake.notify_one();
        }
    }

    /// Events waiting in the buffer (not counting a batch being flushed).
    pub fn buffered(&self) -> usize {
        self.shared.buffer().events.len()
    }

    /// Events accepted by `publish` so far.
    pub fn published(&self) -> u64 {
        self.shared.published.load(Ordering::Relaxed)
    }
}

impl EventSink for BatchedPublisher {
    async fn publish(&self, event: Event) {
        BatchedPublisher::publish(self, event).await
    }
}

impl FlusherHandle {
    /// Stop the flusher after a final flush of everything still buffered.
    ///
    /// The final batch is attempted up to `shutdown_flush_attempts` times;
    /// if every attempt fails its events are logged as lost. Producers should
    /// be stopped first; events published afterwards are dropped.
    pub async fn shutdown(self) -> FlushStats {
        self.shutdown.cancel();
        match self.task.await {
            Ok(stats) => stats,
            Err(err) => {
                error!(error = %err, "flusher task failed");
                self.shared.capacity.close();
                FlushStats::default()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Flusher
// ---------------------------------------------------------------------------

struct Flusher<R> {
    shared: Arc<Shared>,
    repository: R,
    shutdown: CancellationToken,
    stats: FlushStats,
}

impl<R: EventRepository> Flusher<R> {
    async fn run(mut self) -> FlushStats {
        let mut carried: Vec<Event> = Vec::new();

        loop {
            let (due, deadline) = self.shared.due();
            if !due {
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = self.shared.wake.notified() => continue,
                    _ = sleep_until(deadline) => {}
                }
            }

            let batch = self.shared.take();
            if batch.is_empty() {
                continue;
            }
            if let Some(unflushed) = self.flush_until_stored(batch).await {
                carried = unflushed;
                break;
            }
        }

        carried.extend(self.shared.take());
        self.final_flush(carried).await;
        self.shared.capacity.close();

        info!(
            batches = self.stats.batches,
            events = self.stats.events,
            failed_attempts = self.stats.failed_attempts,
            lost = self.stats.lost,
            "publisher stopped"
        );
        self.stats
    }

    /// Retry `batch` until it is stored. Returns the batch back if shutdown
    /// was requested while waiting to retry.
    async fn flush_until_stored(&mut self, batch: Vec<Event>) -> Option<Vec<Event>> {
        let mut backoff = self.shared.config.retry_initial_backoff;
        let mut attempt = 1u32;

        loop {
            if self.try_flush(&batch, attempt).await {
                return None;
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => return Some(batch),
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = next_backoff(backoff, self.shared.config.retry_max_backoff);
            attempt += 1;
        }
    }

    async fn final_flush(&mut self, batch: Vec<Event>) {
        if batch.is_empty() {
            return;
        }

        let attempts = self.shared.config.shutdown_flush_attempts.max(1);
        let mut backoff = self.shared.config.retry_initial_backoff;
        for attempt in 1..=attempts {
            if self.try_flush(&batch, attempt).await {
                return;
            }
            if attempt < attempts {
                tokio::time::sleep(backoff).await;
                backoff = next_backoff(backoff, self.shared.config.retry_max_backoff);
            }
        }

        error!(
            events = batch.len(),
            attempts, "giving up on final batch, events lost"
        );
        self.stats.lost += batch.len() as u64;
    }

    async fn try_flush(&mut self, batch: &[Event], attempt: u32) -> bool {
        match self.repository.add_batch(batch).await {
            Ok(ids) => {
                debug!(
                    events = batch.len(),
                    first_id = ids.first().copied(),
                    attempt,
                    "batch flushed"
                );
                self.stats.batches += 1;
                self.stats.events += batch.len() as u64;
                self.shared.capacity.add_permits(batch.len());
                true
            }
            Err(err) => {
                warn!(events = batch.len(), attempt, error = %err, "batch flush failed");
                self.stats.failed_attempts += 1;
                false
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn next_backoff(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Result, StoreError};
    use crate::repository::MemoryRepository;
    use chrono::{TimeZone, Utc};
    use logpond_core::EventId;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicU32;

    fn event(raw: &str) -> Event {
        Event {
            raw: raw.to_string(),
            source: "test.log".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            fields: Default::default(),
        }
    }

    fn config(max_batch_size: usize, max_buffered_events: usize) -> PublisherConfig {
        PublisherConfig {
            max_batch_size,
            max_batch_delay: Duration::from_secs(1),
            max_buffered_events,
            retry_initial_backoff: Duration::from_millis(100),
            retry_max_backoff: Duration::from_millis(400),
            shutdown_flush_attempts: 3,
        }
    }

    /// Fails the first `failures` calls, then stores into memory.
    #[derive(Default)]
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
        inner: MemoryRepository,
        batch_sizes: Mutex<Vec<usize>>,
    }

    impl Flaky {
        fn failing(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                failures,
                ..Default::default()
            })
        }

        fn batch_sizes(&self) -> Vec<usize> {
            self.batch_sizes.lock().unwrap().clone()
        }
    }

    impl EventRepository for Flaky {
        async fn add_batch(&self, events: &[Event]) -> Result<Vec<EventId>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(StoreError::Io(std::io::Error::other("disk unavailable")));
            }
            self.batch_sizes.lock().unwrap().push(events.len());
            self.inner.add_batch(events).await
        }
    }

    /// Let the flusher task run until it parks again.
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn full_batch_flushes_once() {
        let repo = Flaky::failing(0);
        let (publisher, flusher) = BatchedPublisher::spawn(config(3, 100), repo.clone());

        for raw in ["a", "b", "c"] {
            publisher.publish(event(raw)).await;
        }
        settle().await;

        assert_eq!(repo.batch_sizes(), vec![3]);
        assert_eq!(publisher.buffered(), 0);

        let stats = flusher.shutdown().await;
        assert_eq!(stats.batches, 1);
        assert_eq!(stats.events, 3);
        assert_eq!(repo.batch_sizes(), vec![3]);
    }

    #[tokio::test(start_paused = true)]
    async fn partial_batch_flushes_after_delay() {
        let repo = Flaky::failing(0);
        let (publisher, flusher) = BatchedPublisher::spawn(config(10, 100), repo.clone());

        publisher.publish(event("a")).await;
        publisher.publish(event("b")).await;
        settle().await;
        assert!(repo.batch_sizes().is_empty());

        tokio::time::sleep(Duration::from_millis(999)).await;
        settle().await;
        assert!(repo.batch_sizes().is_empty());

        tokio::time::sleep(Duration::from_millis(2)).await;
        settle().await;
        assert_eq!(repo.batch_sizes(), vec![2]);

        flusher.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_flush_is_retried_without_loss() {
        let repo = Flaky::failing(2);
        let (publisher, flusher) = BatchedPublisher::spawn(config(2, 100), repo.clone());

        publisher.publish(event("a")).await;
        publisher.publish(event("b")).await;

        // 100ms then 200ms of backoff before the third attempt succeeds.
        tokio::time::sleep(Duration::from_millis(350)).await;
        settle().await;

        let stored: Vec<String> = repo.inner.events().into_iter().map(|s| s.event.raw).collect();
        assert_eq!(stored, vec!["a", "b"]);

        let stats = flusher.shutdown().await;
        assert_eq!(stats.failed_attempts, 2);
        assert_eq!(stats.events, 2);
        assert_eq!(stats.lost, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn publish_blocks_at_capacity_until_flush_succeeds() {
        let repo = Flaky::failing(1);
        let (publisher, flusher) = BatchedPublisher::spawn(config(2, 2), repo.clone());

        publisher.publish(event("a")).await;
        publisher.publish(event("b")).await;

        let blocked = {
            let publisher = publisher.clone();
            tokio::spawn(async move { publisher.publish(event("c")).await })
        };
        settle().await;
        assert!(!blocked.is_finished());

        // First retry after 100ms succeeds and frees capacity.
        tokio::time::sleep(Duration::from_millis(150)).await;
        settle().await;
        assert!(blocked.is_finished());
        assert_eq!(publisher.published(), 3);

        let stats = flusher.shutdown().await;
        assert_eq!(stats.events, 3);
        let stored: Vec<String> = repo.inner.events().into_iter().map(|s| s.event.raw).collect();
        assert_eq!(stored, vec!["a", "b", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_drains_buffer() {
        let repo = Arc::new(MemoryRepository::new());
        let (publisher, flusher) = BatchedPublisher::spawn(config(100, 1000), repo.clone());

        for i in 0..5 {
            publisher.publish(event(&i.to_string())).await;
        }
        let stats = flusher.shutdown().await;

        assert_eq!(stats.events, 5);
        assert_eq!(repo.len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_gives_up_after_bounded_attempts() {
        let repo = Flaky::failing(u32::MAX);
        let (publisher, flusher) = BatchedPublisher::spawn(config(100, 1000), repo.clone());

        publisher.publish(event("a")).await;
        let stats = flusher.shutdown().await;

        assert_eq!(stats.lost, 1);
        assert_eq!(stats.failed_attempts, 3);
        assert!(repo.inner.is_empty());

        publisher.publish(event("late")).await;
        assert_eq!(publisher.buffered(), 0);
    }

    #[test]
    fn backoff_doubles_up_to_max() {
        let max = Duration::from_millis(500);
        let mut b = Duration::from_millis(100);
        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(b.as_millis());
            b = next_backoff(b, max);
        }
        assert_eq!(seen, vec![100, 200, 400, 500]);
    }
}
