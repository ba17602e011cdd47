//! Versioned mirror of upstream flags and segments.
//!
//! Reconciliation is last-writer-wins by author-assigned version, never by
//! arrival order, so re-applying or reordering snapshots cannot regress
//! stored state. Every mutation is an individual keyed insert, replace or
//! delete; the whole pass is safe to re-run.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, error, info, instrument};

use flagsync_state::{ConfigRecord, ConfigStore, Kind, StorageError};

use crate::error::{Result, SyncError};
use crate::snapshot::{item_key, item_version, Snapshot};

/// Counts of storage mutations performed by one reconcile pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub inserted: usize,
    pub replaced: usize,
    /// Present upstream with a version no newer than the stored one
    pub unchanged: usize,
    pub deleted: usize,
    /// Malformed entries that were logged and ignored
    pub skipped: usize,
}

impl ReconcileReport {
    /// Number of storage writes.
    pub fn mutations(&self) -> usize {
        self.inserted + self.replaced + self.deleted
    }

    fn merge(self, other: ReconcileReport) -> ReconcileReport {
        ReconcileReport {
            inserted: self.inserted + other.inserted,
            replaced: self.replaced + other.replaced,
            unchanged: self.unchanged + other.unchanged,
            deleted: self.deleted + other.deleted,
            skipped: self.skipped + other.skipped,
        }
    }
}

/// What a version-gated upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Replaced,
    /// Stored version was greater than or equal to the incoming one
    Ignored,
}

/// Local, versioned copy of upstream configuration.
pub struct Mirror {
    store: Arc<dyn ConfigStore>,
}

impl Mirror {
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self { store }
    }

    /// Serialized payload for `(kind, key)`.
    pub async fn get(&self, kind: Kind, key: &str) -> Result<Option<String>> {
        Ok(self.store.get(kind, key).await?.map(|r| r.payload))
    }

    /// Every serialized payload of a kind, in no particular order.
    pub async fn get_all(&self, kind: Kind) -> Result<Vec<String>> {
        Ok(self
            .store
            .list(kind)
            .await?
            .into_iter()
            .map(|r| r.payload)
            .collect())
    }

    /// True iff any record of any kind exists.
    pub async fn is_initialized(&self) -> Result<bool> {
        Ok(self.store.any().await?)
    }

    /// Converge stored state onto `snapshot`.
    ///
    /// Both kinds are reconciled concurrently and independently.
    #[instrument(skip_all)]
    pub async fn reconcile(&self, snapshot: &Snapshot) -> Result<ReconcileReport> {
        let (flags, segments) = futures::try_join!(
            self.reconcile_kind(Kind::Flag, snapshot.items(Kind::Flag)),
            self.reconcile_kind(Kind::Segment, snapshot.items(Kind::Segment)),
        )?;

        let report = flags.merge(segments);
        info!(
            inserted = report.inserted,
            replaced = report.replaced,
            unchanged = report.unchanged,
            deleted = report.deleted,
            skipped = report.skipped,
            "Reconciled snapshot"
        );
        Ok(report)
    }

    /// Apply a single incremental item.
    ///
    /// Same version rule as [`Mirror::reconcile`] but never deletes. An item
    /// with `"deleted": true` is stored as a tombstone so that an older
    /// item arriving later cannot resurrect it.
    #[instrument(skip(self, item))]
    pub async fn apply_patch(&self, kind: Kind, item: &Value) -> Result<UpsertOutcome> {
        let key = item_key(item)
            .ok_or_else(|| SyncError::InvalidSnapshot("patch item has no key".to_string()))?;
        let existing = self.store.get(kind, key).await?.map(|r| r.version);
        self.upsert(kind, key, item, existing).await
    }

    async fn reconcile_kind(
        &self,
        kind: Kind,
        items: &Map<String, Value>,
    ) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let mut existing: HashMap<String, u64> = self
            .store
            .list(kind)
            .await?
            .into_iter()
            .map(|r| (r.key, r.version))
            .collect();
        let mut seen: HashSet<String> = HashSet::with_capacity(items.len());

        for (entry_key, item) in items {
            let Some(key) = item_key(item) else {
                error!(kind = %kind, entry = %entry_key, "Skipping snapshot entry without a key");
                // A malformed entry still counts as present for its slot.
                seen.insert(entry_key.clone());
                report.skipped += 1;
                continue;
            };
            seen.insert(key.to_string());

            match self.upsert(kind, key, item, existing.get(key).copied()).await? {
                UpsertOutcome::Inserted => report.inserted += 1,
                UpsertOutcome::Replaced => report.replaced += 1,
                UpsertOutcome::Ignored => {
                    report.unchanged += 1;
                    continue;
                }
            }
            existing.insert(key.to_string(), item_version(item));
        }

        for key in existing.keys().filter(|k| !seen.contains(*k)) {
            debug!(kind = %kind, key = %key, "Deleting item");
            self.store.delete(kind, key).await?;
            report.deleted += 1;
        }

        Ok(report)
    }

    async fn upsert(
        &self,
        kind: Kind,
        key: &str,
        item: &Value,
        existing_version: Option<u64>,
    ) -> Result<UpsertOutcome> {
        let record = ConfigRecord {
            kind,
            key: key.to_string(),
            version: item_version(item),
            payload: serde_json::to_string(item)?,
        };

        match existing_version {
            Some(current) if current >= record.version => Ok(UpsertOutcome::Ignored),
            Some(_) => {
                debug!(kind = %kind, key = %key, version = record.version, "Replacing item");
                self.store.replace(record).await?;
                Ok(UpsertOutcome::Replaced)
            }
            None => {
                debug!(kind = %kind, key = %key, version = record.version, "Inserting item");
                match self.store.insert(record.clone()).await {
                    Ok(()) => Ok(UpsertOutcome::Inserted),
                    // Lost a race with a concurrent writer; fall back to the version gate.
                    Err(StorageError::DuplicateRecord { .. }) => {
                        let current = self.store.get(kind, key).await?.map(|r| r.version);
                        match current {
                            Some(v) if v >= record.version => Ok(UpsertOutcome::Ignored),
                            _ => {
                                self.store.replace(record).await?;
                                Ok(UpsertOutcome::Replaced)
                            }
                        }
                    }
                    Err(e) => Err(e.into()),
                }
            }
        }
    }
}
