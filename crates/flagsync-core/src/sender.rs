//! Batch sender: the body of a delivery job.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, instrument, warn};

use flagsync_state::EventId;

use crate::delivery::DeliveryScheduler;
use crate::error::Result;
use crate::jobs::JobHandler;
use crate::options::DeliveryArgs;
use crate::queue::EventQueue;
use crate::transport::EventTransport;

/// Result of one sender run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Nothing was waiting.
    Empty,
    /// `sent` events were delivered and deleted.
    Delivered { sent: usize, backlog: bool },
}

/// Drains one batch from the queue and hands it to the transport.
pub struct BatchSender {
    queue: Arc<EventQueue>,
    transport: Arc<dyn EventTransport>,
    scheduler: Arc<DeliveryScheduler>,
}

impl BatchSender {
    pub fn new(
        queue: Arc<EventQueue>,
        transport: Arc<dyn EventTransport>,
        scheduler: Arc<DeliveryScheduler>,
    ) -> Self {
        Self {
            queue,
            transport,
            scheduler,
        }
    }

    /// Send the oldest `batchSize` events.
    ///
    /// Delivered events are deleted by identity, so events enqueued while the
    /// request was in flight survive. A failed send deletes nothing; the same
    /// events lead the next attempt.
    #[instrument(skip_all)]
    pub async fn run(&self, args: &DeliveryArgs) -> Result<BatchOutcome> {
        let batch = self.queue.dequeue_oldest(args.options.batch_size()).await?;
        if batch.is_empty() {
            return Ok(BatchOutcome::Empty);
        }

        if let Err(e) = self.transport.send(&batch, args).await {
            warn!(events = batch.len(), error = %e, "Event delivery failed, keeping batch");
            // Single-flight keeps this a no-op while the current job runs; the
            // next enqueue or flush retries.
            if let Err(reschedule) = self.scheduler.reschedule_after_run(args, false).await {
                error!(error = %reschedule, "Failed to re-arm delivery after failed send");
            }
            return Err(e);
        }

        let ids: Vec<EventId> = batch.iter().map(|e| e.id.clone()).collect();
        self.queue.delete(&ids).await?;

        let backlog = self.queue.has_backlog().await?;
        info!(sent = ids.len(), backlog, "Delivered event batch");
        self.scheduler.reschedule_after_run(args, backlog).await?;

        Ok(BatchOutcome::Delivered {
            sent: ids.len(),
            backlog,
        })
    }
}

#[async_trait]
impl JobHandler for BatchSender {
    async fn run(&self, args: DeliveryArgs) -> Result<()> {
        BatchSender::run(self, &args).await.map(|_| ())
    }
}
