//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryConfigStore`, `MemoryEventStore`, `MemoryScheduleStore`
//! and `MemoryTokenStore` that satisfy the trait contracts without any
//! external dependencies.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StorageError;
use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// MemoryConfigStore
// ---------------------------------------------------------------------------

/// In-memory config store backed by a `HashMap<(kind, key), record>`.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    records: Mutex<HashMap<(Kind, String), ConfigRecord>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records across both kinds.
    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn get(&self, kind: Kind, key: &str) -> StorageResult<Option<ConfigRecord>> {
        let records = self.records.lock().unwrap();
        Ok(records.get(&(kind, key.to_string())).cloned())
    }

    async fn list(&self, kind: Kind) -> StorageResult<Vec<ConfigRecord>> {
        let records = self.records.lock().unwrap();
        Ok(records
            .values()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect())
    }

    async fn insert(&self, record: ConfigRecord) -> StorageResult<()> {
        let mut records = self.records.lock().unwrap();
        let id = (record.kind, record.key.clone());
        if records.contains_key(&id) {
            return Err(StorageError::DuplicateRecord {
                kind: record.kind.to_string(),
                key: record.key,
            });
        }
        records.insert(id, record);
        Ok(())
    }

    async fn replace(&self, record: ConfigRecord) -> StorageResult<()> {
        let mut records = self.records.lock().unwrap();
        if let Some(existing) = records.get_mut(&(record.kind, record.key.clone())) {
            *existing = record;
        }
        Ok(())
    }

    async fn delete(&self, kind: Kind, key: &str) -> StorageResult<()> {
        let mut records = self.records.lock().unwrap();
        records.remove(&(kind, key.to_string()));
        Ok(())
    }

    async fn any(&self) -> StorageResult<bool> {
        let records = self.records.lock().unwrap();
        Ok(!records.is_empty())
    }
}

// ---------------------------------------------------------------------------
// MemoryEventStore
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct EventLog {
    next_seq: u64,
    events: BTreeMap<u64, EventRecord>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self {
            next_seq: 1,
            events: BTreeMap::new(),
        }
    }
}

/// In-memory event store backed by a `BTreeMap<seq, record>`.
#[derive(Debug, Default)]
pub struct MemoryEventStore {
    log: Mutex<EventLog>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Payloads of every live event, oldest first.
    pub fn payloads(&self) -> Vec<String> {
        let log = self.log.lock().unwrap();
        log.events.values().map(|e| e.payload.clone()).collect()
    }

    /// Number of live events.
    pub fn len(&self) -> usize {
        self.log.lock().unwrap().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn append(&self, payloads: Vec<String>) -> StorageResult<Vec<EventRecord>> {
        let mut log = self.log.lock().unwrap();
        let mut stored = Vec::with_capacity(payloads.len());
        for payload in payloads {
            let seq = log.next_seq;
            log.next_seq += 1;
            let record = EventRecord {
                id: EventId::new(),
                seq,
                payload,
                created_at: Utc::now(),
            };
            log.events.insert(seq, record.clone());
            stored.push(record);
        }
        Ok(stored)
    }

    async fn oldest(&self, limit: usize) -> StorageResult<Vec<EventRecord>> {
        let log = self.log.lock().unwrap();
        Ok(log.events.values().take(limit).cloned().collect())
    }

    async fn count(&self, limit: usize) -> StorageResult<usize> {
        let log = self.log.lock().unwrap();
        Ok(log.events.len().min(limit))
    }

    async fn delete(&self, ids: &[EventId]) -> StorageResult<()> {
        let doomed: HashSet<&EventId> = ids.iter().collect();
        let mut log = self.log.lock().unwrap();
        log.events.retain(|_, e| !doomed.contains(&e.id));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryScheduleStore
// ---------------------------------------------------------------------------

/// In-memory schedule pointer store.
///
/// Keeps every inserted pointer so tests can observe a violated
/// single-pointer invariant instead of having it silently overwritten.
#[derive(Debug, Default)]
pub struct MemoryScheduleStore {
    pointers: Mutex<Vec<ScheduleRecord>>,
}

impl MemoryScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored pointer, in insertion order.
    pub fn all(&self) -> Vec<ScheduleRecord> {
        self.pointers.lock().unwrap().clone()
    }
}

#[async_trait]
impl ScheduleStore for MemoryScheduleStore {
    async fn current(&self) -> StorageResult<Option<ScheduleRecord>> {
        let pointers = self.pointers.lock().unwrap();
        Ok(pointers.first().cloned())
    }

    async fn insert(&self, record: ScheduleRecord) -> StorageResult<()> {
        let mut pointers = self.pointers.lock().unwrap();
        pointers.push(record);
        Ok(())
    }

    async fn remove(&self, job_id: &JobId) -> StorageResult<()> {
        let mut pointers = self.pointers.lock().unwrap();
        pointers.retain(|p| &p.job_id != job_id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryTokenStore
// ---------------------------------------------------------------------------

/// In-memory token store holding at most one token.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: Mutex<Option<TokenRecord>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn current(&self) -> StorageResult<Option<TokenRecord>> {
        Ok(self.token.lock().unwrap().clone())
    }

    async fn insert(&self, record: TokenRecord) -> StorageResult<()> {
        let mut token = self.token.lock().unwrap();
        if token.is_some() {
            return Err(StorageError::TokenExists);
        }
        *token = Some(record);
        Ok(())
    }
}
