//! Event processor: the entry point evaluation code uses to record events.

use std::sync::Arc;

use tracing::debug;

use flagsync_state::{EventStore, ScheduleStore};

use crate::delivery::{DeliveryScheduler, ScheduleDecision};
use crate::error::Result;
use crate::jobs::{JobHandler, JobScheduler, TokioJobScheduler};
use crate::options::{DeliveryArgs, DeliveryOptions};
use crate::queue::{EnqueueOutcome, EventQueue};
use crate::sender::BatchSender;
use crate::transport::EventTransport;

/// Buffers events and keeps a delivery job armed.
pub struct EventProcessor {
    queue: Arc<EventQueue>,
    scheduler: Arc<DeliveryScheduler>,
}

impl EventProcessor {
    pub fn new(queue: Arc<EventQueue>, scheduler: Arc<DeliveryScheduler>) -> Self {
        Self { queue, scheduler }
    }

    /// Store `payloads` (subject to capacity) and make sure delivery is scheduled.
    ///
    /// Returns once the events are stored; delivery happens later on the job.
    pub async fn enqueue(
        &self,
        payloads: Vec<String>,
        delivery_key: &str,
        options: Option<DeliveryOptions>,
    ) -> Result<EnqueueOutcome> {
        let options = options.unwrap_or_default();
        options.validate()?;
        let args = DeliveryArgs::new(delivery_key, options);

        let outcome = self.queue.enqueue(payloads, args.options.capacity()).await?;
        let decision = self.scheduler.ensure_scheduled(&args, false).await?;
        debug!(accepted = outcome.accepted, dropped = outcome.dropped, job_id = %decision.job_id(), "Enqueued events");
        Ok(outcome)
    }

    /// Request a delivery run now, e.g. to retry after a failed send.
    pub async fn flush(&self, args: &DeliveryArgs) -> Result<ScheduleDecision> {
        args.options.validate()?;
        self.scheduler.ensure_scheduled(args, true).await
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    pub fn scheduler(&self) -> &Arc<DeliveryScheduler> {
        &self.scheduler
    }
}

/// Fully wired delivery stack running on [`TokioJobScheduler`].
pub struct DeliveryPipeline {
    pub processor: EventProcessor,
    pub sender: Arc<BatchSender>,
    pub jobs: Arc<TokioJobScheduler>,
}

impl DeliveryPipeline {
    /// Wire queue, scheduler, sender and executor over the given stores.
    pub fn new(
        events: Arc<dyn EventStore>,
        schedules: Arc<dyn ScheduleStore>,
        transport: Arc<dyn EventTransport>,
    ) -> Result<Self> {
        let jobs = Arc::new(TokioJobScheduler::new());
        let queue = Arc::new(EventQueue::new(events));
        let scheduler = Arc::new(DeliveryScheduler::new(
            schedules,
            Arc::clone(&jobs) as Arc<dyn JobScheduler>,
        ));
        let sender = Arc::new(BatchSender::new(
            Arc::clone(&queue),
            transport,
            Arc::clone(&scheduler),
        ));

        let handler: Arc<dyn JobHandler> = sender.clone();
        jobs.bind(Arc::downgrade(&handler))?;

        Ok(Self {
            processor: EventProcessor::new(queue, scheduler),
            sender,
            jobs,
        })
    }
}
