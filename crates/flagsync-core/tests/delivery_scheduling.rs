//! Single-flight behaviour of the delivery scheduler.

use std::sync::Arc;
use std::time::Duration;

use flagsync_core::fakes::ManualJobScheduler;
use flagsync_core::{DeliveryArgs, DeliveryOptions, DeliveryScheduler, JobState, ScheduleDecision};
use flagsync_state::fakes::MemoryScheduleStore;
use flagsync_state::JobId;

struct Fixture {
    schedules: Arc<MemoryScheduleStore>,
    jobs: Arc<ManualJobScheduler>,
    scheduler: DeliveryScheduler,
}

fn fixture() -> Fixture {
    let schedules = Arc::new(MemoryScheduleStore::new());
    let jobs = Arc::new(ManualJobScheduler::new());
    let scheduler = DeliveryScheduler::new(schedules.clone(), jobs.clone());
    Fixture {
        schedules,
        jobs,
        scheduler,
    }
}

fn args(key: &str) -> DeliveryArgs {
    DeliveryArgs::new(key, DeliveryOptions::default())
}

impl Fixture {
    fn pointers(&self) -> Vec<JobId> {
        self.schedules.all().into_iter().map(|p| p.job_id).collect()
    }

    fn last_delay(&self) -> Duration {
        self.jobs.scheduled().last().unwrap().delay
    }
}

#[tokio::test]
async fn first_call_creates_job_after_interval() {
    let f = fixture();

    let decision = f.scheduler.ensure_scheduled(&args("k"), false).await.unwrap();

    let ScheduleDecision::Created(job_id) = decision else {
        panic!("expected a new job, got {decision:?}");
    };
    assert_eq!(f.pointers(), vec![job_id.clone()]);
    assert_eq!(f.jobs.state(&job_id), Some(JobState::Pending));
    assert_eq!(f.last_delay(), Duration::from_secs(5));
}

#[tokio::test]
async fn configured_interval_is_used() {
    let f = fixture();
    let options = DeliveryOptions {
        event_processing_interval_seconds: Some(30.0),
        ..Default::default()
    };

    f.scheduler
        .ensure_scheduled(&DeliveryArgs::new("k", options), false)
        .await
        .unwrap();
    assert_eq!(f.last_delay(), Duration::from_secs(30));
}

#[tokio::test]
async fn identical_args_keep_the_pending_job() {
    let f = fixture();
    let first = f.scheduler.ensure_scheduled(&args("k"), false).await.unwrap();
    let second = f.scheduler.ensure_scheduled(&args("k"), false).await.unwrap();
    let third = f.scheduler.ensure_scheduled(&args("k"), false).await.unwrap();

    assert_eq!(second, ScheduleDecision::Kept(first.job_id().clone()));
    assert_eq!(third.job_id(), first.job_id());
    assert_eq!(f.pointers(), vec![first.job_id().clone()]);
    assert_eq!(f.jobs.scheduled().len(), 1);
}

#[tokio::test]
async fn changed_args_replace_and_cancel() {
    let f = fixture();
    let first = f.scheduler.ensure_scheduled(&args("k"), false).await.unwrap();

    let changed = DeliveryArgs::new(
        "k",
        DeliveryOptions {
            events_uri: Some("https://collector.example".to_string()),
            ..Default::default()
        },
    );
    let decision = f.scheduler.ensure_scheduled(&changed, false).await.unwrap();

    let ScheduleDecision::Replaced { previous, job_id } = decision else {
        panic!("expected replacement, got {decision:?}");
    };
    assert_eq!(&previous, first.job_id());
    assert_ne!(&job_id, first.job_id());
    assert_eq!(f.jobs.state(&previous), Some(JobState::Canceled));
    assert_eq!(f.pointers(), vec![job_id.clone()]);

    let replacement = f.jobs.scheduled().pop().unwrap();
    assert_eq!(replacement.info.args, changed);
}

#[tokio::test]
async fn running_job_is_not_canceled() {
    let f = fixture();
    let first = f.scheduler.ensure_scheduled(&args("k"), false).await.unwrap();
    f.jobs.set_state(first.job_id(), JobState::Running);

    // Same args while running: single-flight.
    let kept = f.scheduler.ensure_scheduled(&args("k"), false).await.unwrap();
    assert_eq!(kept, ScheduleDecision::Kept(first.job_id().clone()));

    // Different key while running: new job, old one left to finish.
    let replaced = f.scheduler.ensure_scheduled(&args("k2"), false).await.unwrap();
    assert!(matches!(replaced, ScheduleDecision::Replaced { .. }));
    assert_eq!(f.jobs.state(first.job_id()), Some(JobState::Running));
    assert_eq!(f.pointers(), vec![replaced.job_id().clone()]);
}

#[tokio::test]
async fn finished_jobs_are_replaced() {
    for finished in [JobState::Succeeded, JobState::Failed, JobState::Canceled] {
        let f = fixture();
        let first = f.scheduler.ensure_scheduled(&args("k"), false).await.unwrap();
        f.jobs.set_state(first.job_id(), finished);

        let decision = f.scheduler.ensure_scheduled(&args("k"), false).await.unwrap();
        assert!(
            matches!(decision, ScheduleDecision::Replaced { .. }),
            "{finished} job was kept"
        );
        assert_eq!(f.pointers(), vec![decision.job_id().clone()]);
        assert_eq!(f.jobs.state(decision.job_id()), Some(JobState::Pending));
    }
}

#[tokio::test]
async fn job_unknown_to_executor_is_replaced() {
    let f = fixture();
    let first = f.scheduler.ensure_scheduled(&args("k"), false).await.unwrap();
    f.jobs.forget(first.job_id());

    let decision = f.scheduler.ensure_scheduled(&args("k"), false).await.unwrap();
    assert!(matches!(decision, ScheduleDecision::Replaced { .. }));
    assert_eq!(f.pointers(), vec![decision.job_id().clone()]);
}

#[tokio::test]
async fn immediate_request_reschedules_now() {
    let f = fixture();
    let first = f.scheduler.ensure_scheduled(&args("k"), false).await.unwrap();

    let decision = f.scheduler.ensure_scheduled(&args("k"), true).await.unwrap();

    assert!(matches!(decision, ScheduleDecision::Replaced { .. }));
    assert_eq!(f.jobs.state(first.job_id()), Some(JobState::Canceled));
    assert_eq!(f.last_delay(), Duration::ZERO);
    assert_eq!(f.jobs.pending(), vec![decision.job_id().clone()]);
}

#[tokio::test]
async fn current_reports_pointer_and_state() {
    let f = fixture();
    assert!(f.scheduler.current().await.unwrap().is_none());

    let created = f.scheduler.ensure_scheduled(&args("k"), false).await.unwrap();
    let (job_id, info) = f.scheduler.current().await.unwrap().unwrap();
    assert_eq!(&job_id, created.job_id());
    assert_eq!(info.unwrap().state, JobState::Pending);
}
