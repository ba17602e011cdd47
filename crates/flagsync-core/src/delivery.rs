//! Single-flight delivery scheduling.
//!
//! At most one live delivery job exists at a time. The persisted schedule
//! pointer names it; [`DeliveryScheduler::ensure_scheduled`] either keeps
//! that job or replaces it when it finished, went missing, was scheduled
//! with different args, or an immediate run is requested.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info};

use flagsync_state::{JobId, ScheduleRecord, ScheduleStore};

use crate::error::Result;
use crate::jobs::{JobInfo, JobScheduler, JobState};
use crate::options::DeliveryArgs;

/// What `ensure_scheduled` did with the schedule pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleDecision {
    /// No pointer existed; a job was scheduled.
    Created(JobId),
    /// The current job was superseded by a new one.
    Replaced { previous: JobId, job_id: JobId },
    /// The current job is live with the same args.
    Kept(JobId),
}

impl ScheduleDecision {
    /// The job the pointer names afterwards.
    pub fn job_id(&self) -> &JobId {
        match self {
            ScheduleDecision::Created(id) => id,
            ScheduleDecision::Replaced { job_id, .. } => job_id,
            ScheduleDecision::Kept(id) => id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplaceReason {
    Missing,
    Finished(JobState),
    ArgsChanged,
    Immediate,
}

impl std::fmt::Display for ReplaceReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplaceReason::Missing => f.write_str("job missing"),
            ReplaceReason::Finished(state) => write!(f, "job {state}"),
            ReplaceReason::ArgsChanged => f.write_str("args changed"),
            ReplaceReason::Immediate => f.write_str("immediate run requested"),
        }
    }
}

fn replace_reason(
    job: Option<&JobInfo>,
    args: &DeliveryArgs,
    immediate: bool,
) -> Option<ReplaceReason> {
    match job {
        None => Some(ReplaceReason::Missing),
        Some(info) if info.state.is_terminal() => Some(ReplaceReason::Finished(info.state)),
        Some(info) if info.args != *args => Some(ReplaceReason::ArgsChanged),
        Some(_) if immediate => Some(ReplaceReason::Immediate),
        Some(_) => None,
    }
}

/// Keeps exactly one pending or running delivery job.
pub struct DeliveryScheduler {
    schedules: Arc<dyn ScheduleStore>,
    jobs: Arc<dyn JobScheduler>,
    // Makes the pointer check-and-swap atomic within this process.
    decide: Mutex<()>,
}

impl DeliveryScheduler {
    pub fn new(schedules: Arc<dyn ScheduleStore>, jobs: Arc<dyn JobScheduler>) -> Self {
        Self {
            schedules,
            jobs,
            decide: Mutex::new(()),
        }
    }

    /// Make sure a delivery job for `args` is pending or running.
    ///
    /// A non-immediate job runs after the configured processing interval.
    pub async fn ensure_scheduled(
        &self,
        args: &DeliveryArgs,
        immediate: bool,
    ) -> Result<ScheduleDecision> {
        let _guard = self.decide.lock().await;
        self.ensure_locked(args, immediate).await
    }

    /// Re-arm delivery at the end of a job that ran with `args`.
    ///
    /// Returns `None` without touching the pointer when it names a live job
    /// scheduled with different args: that job superseded the finishing one
    /// and already owns delivery.
    pub async fn reschedule_after_run(
        &self,
        args: &DeliveryArgs,
        immediate: bool,
    ) -> Result<Option<ScheduleDecision>> {
        let _guard = self.decide.lock().await;

        if let Some(pointer) = self.schedules.current().await? {
            if let Some(info) = self.jobs.inspect(&pointer.job_id).await? {
                if !info.state.is_terminal() && info.args != *args {
                    debug!(job_id = %pointer.job_id, "Finished job was superseded; leaving newer job");
                    return Ok(None);
                }
            }
        }

        self.ensure_locked(args, immediate).await.map(Some)
    }

    async fn ensure_locked(&self, args: &DeliveryArgs, immediate: bool) -> Result<ScheduleDecision> {
        let Some(pointer) = self.schedules.current().await? else {
            let job_id = self.create(args, immediate).await?;
            return Ok(ScheduleDecision::Created(job_id));
        };

        let job = self.jobs.inspect(&pointer.job_id).await?;
        let Some(reason) = replace_reason(job.as_ref(), args, immediate) else {
            debug!(job_id = %pointer.job_id, "Delivery job already scheduled");
            return Ok(ScheduleDecision::Kept(pointer.job_id));
        };

        info!(job_id = %pointer.job_id, reason = %reason, "Rescheduling delivery job");
        self.schedules.remove(&pointer.job_id).await?;
        if let Some(info) = &job {
            // Running jobs finish on their own to avoid a partial send.
            if info.state == JobState::Pending {
                self.jobs.cancel(&pointer.job_id).await?;
            }
        }

        let job_id = self.create(args, immediate).await?;
        Ok(ScheduleDecision::Replaced {
            previous: pointer.job_id,
            job_id,
        })
    }

    /// The current pointer and, if the executor knows it, the job state.
    pub async fn current(&self) -> Result<Option<(JobId, Option<JobInfo>)>> {
        let Some(pointer) = self.schedules.current().await? else {
            return Ok(None);
        };
        let info = self.jobs.inspect(&pointer.job_id).await?;
        Ok(Some((pointer.job_id, info)))
    }

    async fn create(&self, args: &DeliveryArgs, immediate: bool) -> Result<JobId> {
        let delay = if immediate {
            Duration::ZERO
        } else {
            args.options.interval()
        };
        let job_id = self.jobs.schedule(delay, args.clone()).await?;
        self.schedules
            .insert(ScheduleRecord {
                job_id: job_id.clone(),
            })
            .await?;
        Ok(job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn info(state: JobState, key: &str) -> JobInfo {
        JobInfo {
            args: DeliveryArgs::new(key, Default::default()),
            state,
            scheduled_at: Utc::now(),
        }
    }

    #[test]
    fn live_job_with_same_args_is_kept() {
        let args = DeliveryArgs::new("k", Default::default());
        assert_eq!(
            replace_reason(Some(&info(JobState::Pending, "k")), &args, false),
            None
        );
        assert_eq!(
            replace_reason(Some(&info(JobState::Running, "k")), &args, false),
            None
        );
    }

    #[test]
    fn replacement_reasons() {
        let args = DeliveryArgs::new("k", Default::default());
        assert_eq!(replace_reason(None, &args, false), Some(ReplaceReason::Missing));
        assert_eq!(
            replace_reason(Some(&info(JobState::Failed, "k")), &args, false),
            Some(ReplaceReason::Finished(JobState::Failed))
        );
        assert_eq!(
            replace_reason(Some(&info(JobState::Pending, "other")), &args, false),
            Some(ReplaceReason::ArgsChanged)
        );
        assert_eq!(
            replace_reason(Some(&info(JobState::Running, "k")), &args, true),
            Some(ReplaceReason::Immediate)
        );
    }
}
