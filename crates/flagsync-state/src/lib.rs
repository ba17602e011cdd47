//! Flagsync-State: SurrealDB Backend for flagsync
//!
//! This crate provides the persistence layer for the flag mirror and the
//! outbound event queue. It handles all I/O with SurrealDB behind a small set
//! of backend-agnostic storage traits.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: keyed, versioned records and insertion-ordered queues.
//!
//! ## Key Components
//!
//! - `ConfigStore`: flags and segments keyed by `(kind, key)` with a version
//! - `EventStore`: telemetry payloads in insertion order
//! - `ScheduleStore`: pointer to the single live delivery job
//! - `TokenStore`: digest of the webhook token
//! - `SurrealStore`: SurrealDB implementation of all four
//! - `fakes`: in-memory implementations for tests

mod error;
pub mod fakes;
mod handle;
mod migrations;
mod schema;
pub mod storage_traits;
pub mod surreal_store;

pub use error::{StateError, StorageError};
pub use handle::{ConnectionConfig, Credentials, SurrealHandle};
pub use schema::{ConfigRow, EventRow, ScheduleRow, TokenRow};
pub use storage_traits::{
    ConfigRecord, ConfigStore, EventId, EventRecord, EventStore, JobId, Kind, ScheduleRecord,
    ScheduleStore, StorageResult, TokenDigest, TokenRecord, TokenStore,
};
pub use surreal_store::SurrealStore;

/// Result type for connection and schema operations
pub type Result<T> = std::result::Result<T, StateError>;
