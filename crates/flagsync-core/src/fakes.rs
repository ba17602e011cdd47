//! Test doubles for the core's collaborators (testing only)
//!
//! - `ManualJobScheduler`: records jobs and runs them only when told to
//! - `RecordingTransport`: captures every batch, can be switched to fail
//! - `CountingConfigStore`: counts storage reads through a `ConfigStore`

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use flagsync_state::{ConfigRecord, ConfigStore, EventRecord, JobId, Kind, StorageResult};

use crate::error::{Result, SyncError};
use crate::jobs::{HandlerSlot, JobHandler, JobInfo, JobScheduler, JobState};
use crate::options::DeliveryArgs;
use crate::transport::EventTransport;

// ---------------------------------------------------------------------------
// ManualJobScheduler
// ---------------------------------------------------------------------------

/// A job as recorded by [`ManualJobScheduler`].
#[derive(Debug, Clone)]
pub struct ManualJob {
    pub job_id: JobId,
    pub delay: Duration,
    pub info: JobInfo,
}

/// Job scheduler that never runs anything on its own.
///
/// Tests drive execution with [`ManualJobScheduler::run`] or
/// [`ManualJobScheduler::run_next`], which move the job through
/// running to succeeded or failed around the bound handler.
#[derive(Default)]
pub struct ManualJobScheduler {
    slot: HandlerSlot,
    jobs: Mutex<Vec<ManualJob>>,
}

impl ManualJobScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&self, handler: Weak<dyn JobHandler>) -> Result<()> {
        self.slot.bind(handler)
    }

    /// Every job ever scheduled, oldest first.
    pub fn scheduled(&self) -> Vec<ManualJob> {
        self.jobs.lock().unwrap().clone()
    }

    pub fn state(&self, job_id: &JobId) -> Option<JobState> {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .find(|j| &j.job_id == job_id)
            .map(|j| j.info.state)
    }

    /// Force a job into `state`.
    pub fn set_state(&self, job_id: &JobId, state: JobState) {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.iter_mut().find(|j| &j.job_id == job_id) {
            job.info.state = state;
        }
    }

    /// Drop all knowledge of a job, as if the executor lost it.
    pub fn forget(&self, job_id: &JobId) {
        self.jobs.lock().unwrap().retain(|j| &j.job_id != job_id);
    }

    /// Ids of jobs still waiting to run.
    pub fn pending(&self) -> Vec<JobId> {
        self.with_state(JobState::Pending)
    }

    pub fn canceled(&self) -> Vec<JobId> {
        self.with_state(JobState::Canceled)
    }

    fn with_state(&self, state: JobState) -> Vec<JobId> {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .filter(|j| j.info.state == state)
            .map(|j| j.job_id.clone())
            .collect()
    }

    /// Run a pending job through the bound handler.
    pub async fn run(&self, job_id: &JobId) -> Result<()> {
        let args = {
            let mut jobs = self.jobs.lock().unwrap();
            let job = jobs
                .iter_mut()
                .find(|j| &j.job_id == job_id)
                .ok_or_else(|| SyncError::Scheduler(format!("unknown job {job_id}")))?;
            if job.info.state != JobState::Pending {
                return Err(SyncError::Scheduler(format!(
                    "job {job_id} is {}",
                    job.info.state
                )));
            }
            job.info.state = JobState::Running;
            job.info.args.clone()
        };

        let handler = self
            .slot
            .get()
            .ok_or_else(|| SyncError::Scheduler("no job handler bound".to_string()))?;
        let outcome = handler.run(args).await;
        let state = if outcome.is_ok() {
            JobState::Succeeded
        } else {
            JobState::Failed
        };
        self.set_state(job_id, state);
        outcome
    }

    /// Run the oldest pending job, if any.
    pub async fn run_next(&self) -> Option<Result<()>> {
        let next = self.pending().into_iter().next()?;
        Some(self.run(&next).await)
    }
}

#[async_trait]
impl JobScheduler for ManualJobScheduler {
    async fn schedule(&self, delay: Duration, args: DeliveryArgs) -> Result<JobId> {
        let job_id = JobId::new();
        self.jobs.lock().unwrap().push(ManualJob {
            job_id: job_id.clone(),
            delay,
            info: JobInfo {
                args,
                state: JobState::Pending,
                scheduled_at: Utc::now(),
            },
        });
        Ok(job_id)
    }

    async fn cancel(&self, job_id: &JobId) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.iter_mut().find(|j| &j.job_id == job_id) {
            if job.info.state == JobState::Pending {
                job.info.state = JobState::Canceled;
            }
        }
        Ok(())
    }

    async fn inspect(&self, job_id: &JobId) -> Result<Option<JobInfo>> {
        let jobs = self.jobs.lock().unwrap();
        Ok(jobs
            .iter()
            .find(|j| &j.job_id == job_id)
            .map(|j| j.info.clone()))
    }
}

// ---------------------------------------------------------------------------
// RecordingTransport
// ---------------------------------------------------------------------------

/// Transport that records each attempted batch's payloads.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    batches: Mutex<Vec<Vec<String>>>,
    failing: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent sends fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Payloads of every attempted batch, including failed ones.
    pub fn batches(&self) -> Vec<Vec<String>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.batches.lock().unwrap().len()
    }
}

#[async_trait]
impl EventTransport for RecordingTransport {
    async fn send(&self, batch: &[EventRecord], _args: &DeliveryArgs) -> Result<()> {
        self.batches
            .lock()
            .unwrap()
            .push(batch.iter().map(|e| e.payload.clone()).collect());
        if self.failing.load(Ordering::SeqCst) {
            return Err(SyncError::Transmit("simulated collector outage".to_string()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// CountingConfigStore
// ---------------------------------------------------------------------------

/// Pass-through [`ConfigStore`] that counts calls.
pub struct CountingConfigStore {
    inner: Arc<dyn ConfigStore>,
    gets: AtomicUsize,
    lists: AtomicUsize,
    any_calls: AtomicUsize,
}

impl CountingConfigStore {
    pub fn new(inner: Arc<dyn ConfigStore>) -> Self {
        Self {
            inner,
            gets: AtomicUsize::new(0),
            lists: AtomicUsize::new(0),
            any_calls: AtomicUsize::new(0),
        }
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn lists(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }

    /// Item reads: `get` plus `list` calls.
    pub fn reads(&self) -> usize {
        self.gets() + self.lists()
    }

    pub fn any_calls(&self) -> usize {
        self.any_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfigStore for CountingConfigStore {
    async fn get(&self, kind: Kind, key: &str) -> StorageResult<Option<ConfigRecord>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(kind, key).await
    }

    async fn list(&self, kind: Kind) -> StorageResult<Vec<ConfigRecord>> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        self.inner.list(kind).await
    }

    async fn insert(&self, record: ConfigRecord) -> StorageResult<()> {
        self.inner.insert(record).await
    }

    async fn replace(&self, record: ConfigRecord) -> StorageResult<()> {
        self.inner.replace(record).await
    }

    async fn delete(&self, kind: Kind, key: &str) -> StorageResult<()> {
        self.inner.delete(kind, key).await
    }

    async fn any(&self) -> StorageResult<bool> {
        self.any_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.any().await
    }
}
