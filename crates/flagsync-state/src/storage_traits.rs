//! Storage trait definitions for flagsync
//!
//! These traits define the persistence seams used by the sync engine:
//! - `ConfigStore`: versioned flag/segment records keyed by `(kind, key)`
//! - `EventStore`: insertion-ordered telemetry payloads awaiting delivery
//! - `ScheduleStore`: the single pointer to the current delivery job
//! - `TokenStore`: the digest of the webhook token
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// ConfigStore: Versioned Mirror Records
// ---------------------------------------------------------------------------

/// The two record kinds mirrored from upstream.
///
/// Each kind owns exactly one storage partition; the mapping is injective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Kind {
    #[serde(rename = "flags")]
    Flag,
    #[serde(rename = "segments")]
    Segment,
}

impl Kind {
    /// Every kind, in reconciliation order.
    pub const ALL: [Kind; 2] = [Kind::Flag, Kind::Segment];

    /// Storage partition name.
    pub fn partition(&self) -> &'static str {
        match self {
            Kind::Flag => "flags",
            Kind::Segment => "segments",
        }
    }

    /// Inverse of [`Kind::partition`].
    pub fn from_partition(partition: &str) -> Option<Self> {
        match partition {
            "flags" => Some(Kind::Flag),
            "segments" => Some(Kind::Segment),
            _ => None,
        }
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.partition())
    }
}

/// One mirrored flag or segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigRecord {
    pub kind: Kind,
    pub key: String,
    /// Author-assigned upstream version. Missing upstream versions are stored as 0.
    pub version: u64,
    /// Serialized item exactly as it will be handed to the evaluation engine
    pub payload: String,
}

/// Versioned flag/segment storage.
///
/// Guarantees:
/// - At most one record exists per `(kind, key)`.
/// - `list(kind)` never returns records of another kind.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Fetch one record, if present.
    async fn get(&self, kind: Kind, key: &str) -> StorageResult<Option<ConfigRecord>>;

    /// Fetch every record of a kind. Order is unspecified.
    async fn list(&self, kind: Kind) -> StorageResult<Vec<ConfigRecord>>;

    /// Insert a new record. Fails with `DuplicateRecord` if the identity exists.
    async fn insert(&self, record: ConfigRecord) -> StorageResult<()>;

    /// Replace the version and payload of an existing record. No-op if absent.
    async fn replace(&self, record: ConfigRecord) -> StorageResult<()>;

    /// Delete a record. No-op if absent.
    async fn delete(&self, kind: Kind, key: &str) -> StorageResult<()>;

    /// True if at least one record of any kind exists.
    async fn any(&self) -> StorageResult<bool>;
}

// ---------------------------------------------------------------------------
// EventStore: Pending Telemetry
// ---------------------------------------------------------------------------

/// Identity of a stored event. Deletion is always by identity, never by count.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub String);

impl EventId {
    /// Generate a new random EventId
    pub fn new() -> Self {
        EventId(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A telemetry payload waiting to be delivered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: EventId,
    /// Insertion order; strictly increasing across appends
    pub seq: u64,
    /// Opaque serialized event
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

/// Insertion-ordered event storage.
///
/// Guarantees:
/// - `append` assigns increasing `seq` values in the order payloads are given.
/// - `oldest` returns records in ascending `seq` order.
/// - `delete` never reorders the remaining records.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append payloads in order, returning the stored records.
    async fn append(&self, payloads: Vec<String>) -> StorageResult<Vec<EventRecord>>;

    /// Return up to `limit` records with the lowest `seq`.
    async fn oldest(&self, limit: usize) -> StorageResult<Vec<EventRecord>>;

    /// Count live records, stopping once `limit` is reached.
    async fn count(&self, limit: usize) -> StorageResult<usize>;

    /// Delete specific records. Unknown ids are ignored.
    async fn delete(&self, ids: &[EventId]) -> StorageResult<()>;
}

// ---------------------------------------------------------------------------
// ScheduleStore: Delivery Job Pointer
// ---------------------------------------------------------------------------

/// Identifier of a job owned by the deferred job scheduler
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random JobId
    pub fn new() -> Self {
        JobId(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Persisted pointer to the current delivery job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleRecord {
    pub job_id: JobId,
}

/// Storage for the single schedule pointer.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// The current pointer, if any.
    async fn current(&self) -> StorageResult<Option<ScheduleRecord>>;

    /// Persist a new pointer.
    async fn insert(&self, record: ScheduleRecord) -> StorageResult<()>;

    /// Remove the pointer to `job_id`. No-op if it is not stored.
    async fn remove(&self, job_id: &JobId) -> StorageResult<()>;
}

// ---------------------------------------------------------------------------
// TokenStore: Webhook Token Digest
// ---------------------------------------------------------------------------

/// SHA-256 digest of a webhook token (lowercase hex).
///
/// Only the digest is persisted; the plaintext token is shown once at issuance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenDigest(String);

impl TokenDigest {
    /// Digest a plaintext token.
    pub fn of(token: &str) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        TokenDigest(hex::encode(hasher.finalize()))
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TokenDigest {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidRecord {
                table: "tokens".to_string(),
                reason: format!("malformed digest: {s}"),
            });
        }
        Ok(TokenDigest(s.to_ascii_lowercase()))
    }
}

/// Stored webhook token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub digest: TokenDigest,
    pub created_at: DateTime<Utc>,
}

/// Storage for the single webhook token.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// The stored token, if any.
    async fn current(&self) -> StorageResult<Option<TokenRecord>>;

    /// Store a token. Fails with `TokenExists` if one is already stored.
    async fn insert(&self, record: TokenRecord) -> StorageResult<()>;
}
