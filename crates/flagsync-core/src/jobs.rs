//! Deferred job scheduling.
//!
//! The delivery scheduler only needs three things from an executor:
//! schedule a job after a delay, cancel it, and inspect its args and state.
//! [`TokioJobScheduler`] provides them in-process on the tokio runtime.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use flagsync_state::JobId;

use crate::error::{Result, SyncError};
use crate::options::DeliveryArgs;

/// Observable lifecycle of a scheduled job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl JobState {
    /// Succeeded, failed and canceled jobs never run again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Canceled
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

/// Snapshot of a job as reported by the executor.
#[derive(Debug, Clone, PartialEq)]
pub struct JobInfo {
    pub args: DeliveryArgs,
    pub state: JobState,
    pub scheduled_at: DateTime<Utc>,
}

/// Executor contract used by the delivery scheduler.
#[async_trait]
pub trait JobScheduler: Send + Sync {
    /// Run the bound handler with `args` after `delay`.
    async fn schedule(&self, delay: Duration, args: DeliveryArgs) -> Result<JobId>;

    /// Cancel a job that has not started. Running or finished jobs are left alone.
    async fn cancel(&self, job_id: &JobId) -> Result<()>;

    /// Current args and state, or `None` if the executor does not know the job.
    async fn inspect(&self, job_id: &JobId) -> Result<Option<JobInfo>>;
}

/// Body of a scheduled job.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, args: DeliveryArgs) -> Result<()>;
}

/// Late-bound handler slot.
///
/// The handler (batch sender) depends on the scheduler through the delivery
/// scheduler, so it is bound after construction and held weakly.
#[derive(Default)]
pub(crate) struct HandlerSlot {
    handler: OnceLock<Weak<dyn JobHandler>>,
}

impl HandlerSlot {
    pub(crate) fn bind(&self, handler: Weak<dyn JobHandler>) -> Result<()> {
        self.handler
            .set(handler)
            .map_err(|_| SyncError::Scheduler("job handler already bound".to_string()))
    }

    pub(crate) fn is_bound(&self) -> bool {
        self.handler.get().is_some()
    }

    pub(crate) fn get(&self) -> Option<Arc<dyn JobHandler>> {
        self.handler.get().and_then(Weak::upgrade)
    }
}

struct JobEntry {
    info: JobInfo,
    task: Option<JoinHandle<()>>,
}

type JobTable = Arc<Mutex<HashMap<JobId, JobEntry>>>;

/// In-process executor: each job is a tokio task that sleeps, then runs.
#[derive(Default)]
pub struct TokioJobScheduler {
    slot: Arc<HandlerSlot>,
    jobs: JobTable,
}

impl TokioJobScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the handler every job runs. May be called once.
    pub fn bind(&self, handler: Weak<dyn JobHandler>) -> Result<()> {
        self.slot.bind(handler)
    }

    /// Number of jobs that are pending or running.
    pub fn active(&self) -> usize {
        self.lock()
            .values()
            .filter(|e| !e.info.state.is_terminal())
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<JobId, JobEntry>> {
        self.jobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn set_state(jobs: &JobTable, job_id: &JobId, state: JobState) {
    let mut table = jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(entry) = table.get_mut(job_id) {
        entry.info.state = state;
        entry.task = None;
    }
}

async fn run_job(slot: Arc<HandlerSlot>, jobs: JobTable, job_id: JobId, delay: Duration) {
    tokio::time::sleep(delay).await;

    let args = {
        let mut table = jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match table.get_mut(&job_id) {
            Some(entry) if entry.info.state == JobState::Pending => {
                entry.info.state = JobState::Running;
                entry.info.args.clone()
            }
            _ => return,
        }
    };

    let Some(handler) = slot.get() else {
        warn!(job_id = %job_id, "Job handler dropped before run");
        set_state(&jobs, &job_id, JobState::Failed);
        return;
    };

    debug!(job_id = %job_id, "Running job");
    let state = match handler.run(args).await {
        Ok(()) => JobState::Succeeded,
        Err(e) => {
            warn!(job_id = %job_id, error = %e, "Job failed");
            JobState::Failed
        }
    };
    set_state(&jobs, &job_id, state);
}

#[async_trait]
impl JobScheduler for TokioJobScheduler {
    async fn schedule(&self, delay: Duration, args: DeliveryArgs) -> Result<JobId> {
        if !self.slot.is_bound() {
            return Err(SyncError::Scheduler("no job handler bound".to_string()));
        }

        let job_id = JobId::new();
        {
            let mut table = self.lock();
            // Finished jobs are only kept until the next schedule call.
            table.retain(|_, e| !e.info.state.is_terminal());
            table.insert(
                job_id.clone(),
                JobEntry {
                    info: JobInfo {
                        args,
                        state: JobState::Pending,
                        scheduled_at: Utc::now(),
                    },
                    task: None,
                },
            );
        }

        let task = tokio::spawn(run_job(
            Arc::clone(&self.slot),
            Arc::clone(&self.jobs),
            job_id.clone(),
            delay,
        ));

        if let Some(entry) = self.lock().get_mut(&job_id) {
            if entry.info.state == JobState::Pending {
                entry.task = Some(task);
            }
        }

        info!(job_id = %job_id, delay_ms = delay.as_millis() as u64, "Scheduled job");
        Ok(job_id)
    }

    async fn cancel(&self, job_id: &JobId) -> Result<()> {
        let mut table = self.lock();
        if let Some(entry) = table.get_mut(job_id) {
            if entry.info.state == JobState::Pending {
                if let Some(task) = entry.task.take() {
                    task.abort();
                }
                entry.info.state = JobState::Canceled;
                info!(job_id = %job_id, "Canceled job");
            }
        }
        Ok(())
    }

    async fn inspect(&self, job_id: &JobId) -> Result<Option<JobInfo>> {
        Ok(self.lock().get(job_id).map(|e| e.info.clone()))
    }
}
