//! The seam between producers of events and whatever buffers or stores them.

use std::future::Future;
use std::sync::Arc;

use crate::types::Event;

/// Destination for enriched events.
///
/// Implementations must accept concurrent calls from any number of tasks.
/// `publish` may wait (for example while a bounded buffer is full) but never
/// drops an event it has accepted.
pub trait EventSink: Send + Sync + 'static {
    fn publish(&self, event: Event) -> impl Future<Output = ()> + Send;
}

impl<T: EventSink> EventSink for Arc<T> {
    fn publish(&self, event: Event) -> impl Future<Output = ()> + Send {
        (**self).publish(event)
    }
}
