//! SurrealDB-backed implementation of every flagsync storage trait
//!
//! Uses the row types in `schema` for persistence, converting to/from
//! `storage_traits` types at the boundary.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::Deserialize;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::StorageError;
use crate::handle::{ConnectionConfig, SurrealHandle};
use crate::schema::{ConfigRow, EventRow, ScheduleRow, TokenRow};
use crate::storage_traits::{
    ConfigRecord, ConfigStore, EventId, EventRecord, EventStore, JobId, Kind, ScheduleRecord,
    ScheduleStore, StorageResult, TokenRecord, TokenStore,
};

/// Attempts for a config write that keeps losing transaction conflicts.
const CONFLICT_RETRIES: usize = 8;

/// A concurrent transaction touched the same keys; the write can be re-run.
fn is_conflict(err: &surrealdb::Error) -> bool {
    let msg = err.to_string();
    msg.contains("read or write conflict") || msg.contains("can be retried")
}

/// The record id or the `(kind, record_key)` index is already taken.
fn is_duplicate(err: &surrealdb::Error) -> bool {
    let msg = err.to_string();
    msg.contains("already exists") || msg.contains("already contains")
}

/// Re-run `op` while it fails with a transaction conflict.
async fn retry_conflicts<T, F, Fut>(mut op: F) -> Result<T, surrealdb::Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, surrealdb::Error>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(e) if attempt < CONFLICT_RETRIES && is_conflict(&e) => {
                debug!(attempt, error = %e, "retrying config write after conflict");
                attempt += 1;
            }
            other => return other,
        }
    }
}

#[derive(Deserialize)]
struct SeqOnly {
    seq: u64,
}

#[derive(Deserialize)]
struct EventIdOnly {
    #[allow(dead_code)]
    event_id: String,
}

/// SurrealDB implementation of [`ConfigStore`], [`EventStore`],
/// [`ScheduleStore`] and [`TokenStore`].
///
/// Event `seq` values come from a process-local counter seeded from the
/// highest stored `seq` at connect time, so one process owns the events
/// table at a time.
pub struct SurrealStore {
    handle: SurrealHandle,
    next_seq: AtomicU64,
}

impl SurrealStore {
    /// Create an in-memory instance for testing.
    pub async fn in_memory() -> crate::Result<Self> {
        Self::connect(&ConnectionConfig::in_memory()).await
    }

    /// Connect according to `config`.
    pub async fn connect(config: &ConnectionConfig) -> crate::Result<Self> {
        let handle = SurrealHandle::connect(config).await?;
        Self::from_handle(handle).await
    }

    /// Wrap an already-migrated handle.
    pub async fn from_handle(handle: SurrealHandle) -> crate::Result<Self> {
        let mut res = handle
            .db()
            .query("SELECT seq FROM events ORDER BY seq DESC LIMIT 1")
            .await?;
        let last: Vec<SeqOnly> = res.take(0)?;
        let next = last.first().map(|row| row.seq + 1).unwrap_or(1);

        info!(next_seq = next, "SurrealStore ready");
        Ok(Self {
            handle,
            next_seq: AtomicU64::new(next),
        })
    }

    fn db(&self) -> &Surreal<Any> {
        self.handle.db()
    }
}

#[async_trait]
impl ConfigStore for SurrealStore {
    async fn get(&self, kind: Kind, key: &str) -> StorageResult<Option<ConfigRecord>> {
        let mut res = self
            .db()
            .query("SELECT * FROM config_records WHERE kind = $kind AND record_key = $key LIMIT 1")
            .bind(("kind", kind.partition().to_string()))
            .bind(("key", key.to_string()))
            .await?;

        let rows: Vec<ConfigRow> = res.take(0)?;
        rows.into_iter().next().map(ConfigRecord::try_from).transpose()
    }

    async fn list(&self, kind: Kind) -> StorageResult<Vec<ConfigRecord>> {
        let mut res = self
            .db()
            .query("SELECT * FROM config_records WHERE kind = $kind")
            .bind(("kind", kind.partition().to_string()))
            .await?;

        let rows: Vec<ConfigRow> = res.take(0)?;
        rows.into_iter().map(ConfigRecord::try_from).collect()
    }

    async fn insert(&self, record: ConfigRecord) -> StorageResult<()> {
        let kind = record.kind;
        let key = record.key.clone();
        let duplicate = || StorageError::DuplicateRecord {
            kind: kind.to_string(),
            key: key.clone(),
        };
        if ConfigStore::get(self, kind, &key).await?.is_some() {
            return Err(duplicate());
        }

        debug!(kind = %kind, key = %key, version = record.version, "inserting config record");
        // The record id is derived from (kind, key), so a racing insert of the
        // same item fails on the id instead of producing a second row.
        let row = ConfigRow::from(record);
        retry_conflicts(move || {
            let row = row.clone();
            async move {
                self.db()
                    .query("CREATE type::thing('config_records', [$kind, $key]) CONTENT $row")
                    .bind(("kind", row.kind.clone()))
                    .bind(("key", row.record_key.clone()))
                    .bind(("row", row))
                    .await?
                    .check()?;
                Ok::<(), surrealdb::Error>(())
            }
        })
        .await
        .map_err(|e| {
            if is_duplicate(&e) {
                duplicate()
            } else {
                e.into()
            }
        })
    }

    async fn replace(&self, record: ConfigRecord) -> StorageResult<()> {
        debug!(kind = %record.kind, key = %record.key, version = record.version, "replacing config record");
        let row = ConfigRow::from(record);
        retry_conflicts(move || {
            let row = row.clone();
            async move {
                self.db()
                    .query(
                        "UPDATE config_records SET version = $version, payload = $payload \
                         WHERE kind = $kind AND record_key = $key",
                    )
                    .bind(("version", row.version))
                    .bind(("payload", row.payload))
                    .bind(("kind", row.kind))
                    .bind(("key", row.record_key))
                    .await?
                    .check()?;
                Ok::<(), surrealdb::Error>(())
            }
        })
        .await?;
        Ok(())
    }

    async fn delete(&self, kind: Kind, key: &str) -> StorageResult<()> {
        debug!(kind = %kind, key = %key, "deleting config record");
        retry_conflicts(move || async move {
            self.db()
                .query("DELETE config_records WHERE kind = $kind AND record_key = $key")
                .bind(("kind", kind.partition().to_string()))
                .bind(("key", key.to_string()))
                .await?
                .check()?;
            Ok::<(), surrealdb::Error>(())
        })
        .await?;
        Ok(())
    }

    async fn any(&self) -> StorageResult<bool> {
        let mut res = self
            .db()
            .query("SELECT * FROM config_records LIMIT 1")
            .await?;
        let rows: Vec<ConfigRow> = res.take(0)?;
        Ok(!rows.is_empty())
    }
}

#[async_trait]
impl EventStore for SurrealStore {
    async fn append(&self, payloads: Vec<String>) -> StorageResult<Vec<EventRecord>> {
        let mut stored = Vec::with_capacity(payloads.len());
        for payload in payloads {
            let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
            let row = EventRow::new(seq, payload);
            let _created: Option<EventRow> = self
                .db()
                .create("events")
                .content(row.clone())
                .await?;
            stored.push(EventRecord::from(row));
        }
        debug!(count = stored.len(), "appended events");
        Ok(stored)
    }

    async fn oldest(&self, limit: usize) -> StorageResult<Vec<EventRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut res = self
            .db()
            .query(format!(
                "SELECT * FROM events ORDER BY seq ASC LIMIT {limit}"
            ))
            .await?;
        let rows: Vec<EventRow> = res.take(0)?;
        Ok(rows.into_iter().map(EventRecord::from).collect())
    }

    async fn count(&self, limit: usize) -> StorageResult<usize> {
        if limit == 0 {
            return Ok(0);
        }
        let mut res = self
            .db()
            .query(format!("SELECT event_id FROM events LIMIT {limit}"))
            .await?;
        let rows: Vec<EventIdOnly> = res.take(0)?;
        Ok(rows.len())
    }

    async fn delete(&self, ids: &[EventId]) -> StorageResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let owned: Vec<String> = ids.iter().map(|id| id.0.clone()).collect();
        debug!(count = owned.len(), "deleting events");
        self.db()
            .query("DELETE events WHERE event_id IN $ids")
            .bind(("ids", owned))
            .await?
            .check()?;
        Ok(())
    }
}

#[async_trait]
impl ScheduleStore for SurrealStore {
    async fn current(&self) -> StorageResult<Option<ScheduleRecord>> {
        let mut res = self
            .db()
            .query("SELECT * FROM event_schedule LIMIT 1")
            .await?;
        let rows: Vec<ScheduleRow> = res.take(0)?;
        Ok(rows.into_iter().next().map(ScheduleRecord::from))
    }

    async fn insert(&self, record: ScheduleRecord) -> StorageResult<()> {
        debug!(job_id = %record.job_id, "persisting schedule pointer");
        let _created: Option<ScheduleRow> = self
            .db()
            .create("event_schedule")
            .content(ScheduleRow::from(record))
            .await?;
        Ok(())
    }

    async fn remove(&self, job_id: &JobId) -> StorageResult<()> {
        debug!(job_id = %job_id, "removing schedule pointer");
        self.db()
            .query("DELETE event_schedule WHERE job_id = $job_id")
            .bind(("job_id", job_id.0.clone()))
            .await?
            .check()?;
        Ok(())
    }
}

#[async_trait]
impl TokenStore for SurrealStore {
    async fn current(&self) -> StorageResult<Option<TokenRecord>> {
        let mut res = self.db().query("SELECT * FROM tokens LIMIT 1").await?;
        let rows: Vec<TokenRow> = res.take(0)?;
        rows.into_iter().next().map(TokenRecord::try_from).transpose()
    }

    async fn insert(&self, record: TokenRecord) -> StorageResult<()> {
        if TokenStore::current(self).await?.is_some() {
            return Err(StorageError::TokenExists);
        }
        let _created: Option<TokenRow> = self
            .db()
            .create("tokens")
            .content(TokenRow::from(record))
            .await?;
        Ok(())
    }
}
