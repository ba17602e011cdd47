//! Flagsync-Core: sync and delivery engine
//!
//! Keeps a local, versioned mirror of upstream flags and segments and
//! delivers buffered evaluation events back upstream in batches.
//!
//! ## Layer 1 - Domain
//!
//! - [`Mirror`]: version-gated reconciliation of snapshots and patches
//! - [`ReadThroughCache`]: per-context memoization for the evaluation engine
//! - [`EventQueue`]: capacity-bounded, drop-newest event buffer
//! - [`DeliveryScheduler`]: single-flight delivery job controller
//! - [`BatchSender`]: drains one batch per job run
//! - [`EventProcessor`]: enqueue entry point tying queue and scheduler together
//! - [`WebhookHandler`]: token-gated snapshot intake

pub mod cache;
pub mod delivery;
pub mod error;
pub mod fakes;
pub mod jobs;
pub mod kind;
pub mod mirror;
pub mod options;
pub mod processor;
pub mod queue;
pub mod sender;
pub mod snapshot;
pub mod telemetry;
pub mod tokens;
pub mod transport;
pub mod webhook;

pub use cache::{FeatureStore, ReadThroughCache};
pub use delivery::{DeliveryScheduler, ScheduleDecision};
pub use error::{Result, SyncError};
pub use jobs::{JobHandler, JobInfo, JobScheduler, JobState, TokioJobScheduler};
pub use kind::KindExt;
pub use mirror::{Mirror, ReconcileReport, UpsertOutcome};
pub use options::{
    DeliveryArgs, DeliveryOptions, DEFAULT_EVENTS_URI, DEFAULT_EVENT_BATCH_SIZE,
    DEFAULT_EVENT_CAPACITY, DEFAULT_PROCESSING_INTERVAL_SECS, MAX_EVENT_BATCH_SIZE,
};
pub use processor::{DeliveryPipeline, EventProcessor};
pub use queue::{EnqueueOutcome, EventQueue};
pub use sender::{BatchOutcome, BatchSender};
pub use snapshot::Snapshot;
pub use tokens::{StoredTokenValidator, TokenCheck, TokenValidator};
pub use transport::{EventTransport, HttpTransport};
pub use webhook::{bearer_token, WebhookHandler};

pub use flagsync_state::Kind;
