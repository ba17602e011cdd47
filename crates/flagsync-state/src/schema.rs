//! Row types for the flagsync SurrealDB tables
//!
//! Tables:
//! - config_records: mirrored flags and segments
//! - events: telemetry awaiting delivery
//! - event_schedule: pointer to the current delivery job
//! - tokens: webhook token digest
//!
//! Rows are converted to and from `storage_traits` types at the store
//! boundary so the traits never see SurrealDB-specific representations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::storage_traits::{
    ConfigRecord, EventId, EventRecord, JobId, Kind, ScheduleRecord, TokenDigest, TokenRecord,
};

/// Module for serializing chrono DateTime to SurrealDB datetime format
mod surreal_datetime {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let sd = SurrealDatetime::from(*date);
        serde::Serialize::serialize(&sd, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = SurrealDatetime::deserialize(deserializer)?;
        Ok(DateTime::from(sd))
    }
}

/// Row in `config_records`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigRow {
    pub kind: String,
    pub record_key: String,
    pub version: u64,
    pub payload: String,
}

impl From<ConfigRecord> for ConfigRow {
    fn from(record: ConfigRecord) -> Self {
        Self {
            kind: record.kind.partition().to_string(),
            record_key: record.key,
            version: record.version,
            payload: record.payload,
        }
    }
}

impl TryFrom<ConfigRow> for ConfigRecord {
    type Error = StorageError;

    fn try_from(row: ConfigRow) -> Result<Self, Self::Error> {
        let kind = Kind::from_partition(&row.kind).ok_or_else(|| StorageError::InvalidRecord {
            table: "config_records".to_string(),
            reason: format!("unknown kind: {}", row.kind),
        })?;
        Ok(ConfigRecord {
            kind,
            key: row.record_key,
            version: row.version,
            payload: row.payload,
        })
    }
}

/// Row in `events`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRow {
    pub event_id: String,
    pub seq: u64,
    pub payload: String,
    #[serde(with = "surreal_datetime")]
    pub created_at: DateTime<Utc>,
}

impl EventRow {
    pub fn new(seq: u64, payload: String) -> Self {
        Self {
            event_id: EventId::new().0,
            seq,
            payload,
            created_at: Utc::now(),
        }
    }
}

impl From<EventRow> for EventRecord {
    fn from(row: EventRow) -> Self {
        EventRecord {
            id: EventId(row.event_id),
            seq: row.seq,
            payload: row.payload,
            created_at: row.created_at,
        }
    }
}

/// Row in `event_schedule`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRow {
    pub job_id: String,
}

impl From<ScheduleRecord> for ScheduleRow {
    fn from(record: ScheduleRecord) -> Self {
        Self {
            job_id: record.job_id.0,
        }
    }
}

impl From<ScheduleRow> for ScheduleRecord {
    fn from(row: ScheduleRow) -> Self {
        ScheduleRecord {
            job_id: JobId(row.job_id),
        }
    }
}

/// Row in `tokens`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRow {
    pub digest: String,
    #[serde(with = "surreal_datetime")]
    pub created_at: DateTime<Utc>,
}

impl From<TokenRecord> for TokenRow {
    fn from(record: TokenRecord) -> Self {
        Self {
            digest: record.digest.as_str().to_string(),
            created_at: record.created_at,
        }
    }
}

impl TryFrom<TokenRow> for TokenRecord {
    type Error = StorageError;

    fn try_from(row: TokenRow) -> Result<Self, Self::Error> {
        Ok(TokenRecord {
            digest: TokenDigest::try_from(row.digest)?,
            created_at: row.created_at,
        })
    }
}
