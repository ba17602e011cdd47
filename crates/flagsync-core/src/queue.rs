//! Capacity-bounded event queue.
//!
//! Drop-newest: once `capacity` events are live, new payloads are discarded
//! on arrival and stored ones are never evicted.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use flagsync_state::{EventId, EventRecord, EventStore};

use crate::error::Result;

/// Result of an enqueue call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnqueueOutcome {
    pub accepted: usize,
    pub dropped: usize,
}

/// FIFO of opaque telemetry payloads awaiting delivery.
pub struct EventQueue {
    store: Arc<dyn EventStore>,
    // Serializes count-then-append so concurrent callers cannot overshoot capacity.
    admit: Mutex<()>,
}

impl EventQueue {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self {
            store,
            admit: Mutex::new(()),
        }
    }

    /// Store as many payloads as fit under `capacity`, earliest first.
    pub async fn enqueue(&self, payloads: Vec<String>, capacity: usize) -> Result<EnqueueOutcome> {
        let submitted = payloads.len();
        if submitted == 0 {
            return Ok(EnqueueOutcome::default());
        }

        let _guard = self.admit.lock().await;
        let live = self.store.count(capacity).await?;
        let room = capacity.saturating_sub(live);

        let mut payloads = payloads;
        payloads.truncate(room);
        let accepted = payloads.len();
        let dropped = submitted - accepted;

        if dropped > 0 {
            warn!(dropped, capacity, live, "Event store is full, dropping events");
        }
        if accepted > 0 {
            self.store.append(payloads).await?;
            debug!(accepted, "Stored events");
        }

        Ok(EnqueueOutcome { accepted, dropped })
    }

    /// Up to `n` longest-resident events, oldest first.
    pub async fn dequeue_oldest(&self, n: usize) -> Result<Vec<EventRecord>> {
        Ok(self.store.oldest(n).await?)
    }

    /// Remove delivered events by identity.
    pub async fn delete(&self, ids: &[EventId]) -> Result<()> {
        Ok(self.store.delete(ids).await?)
    }

    /// True if at least one event is waiting.
    pub async fn has_backlog(&self) -> Result<bool> {
        Ok(self.store.count(1).await? > 0)
    }

    /// Live event count, stopping at `limit`.
    pub async fn backlog(&self, limit: usize) -> Result<usize> {
        Ok(self.store.count(limit).await?)
    }
}
