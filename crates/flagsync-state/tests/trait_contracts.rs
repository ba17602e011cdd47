//! Trait contract tests for ConfigStore, EventStore, ScheduleStore and TokenStore.
//!
//! Each contract is written once against the trait and run against both the
//! in-memory fakes and the SurrealDB `mem://` backend. Any conforming
//! implementation must pass these.

use chrono::Utc;
use flagsync_state::fakes::{
    MemoryConfigStore, MemoryEventStore, MemoryScheduleStore, MemoryTokenStore,
};
use flagsync_state::storage_traits::*;
use flagsync_state::{ConnectionConfig, StorageError, SurrealHandle, SurrealStore};

fn record(kind: Kind, key: &str, version: u64) -> ConfigRecord {
    ConfigRecord {
        kind,
        key: key.to_string(),
        version,
        payload: format!(r#"{{"key":"{key}","version":{version}}}"#),
    }
}

fn payloads(n: usize) -> Vec<String> {
    (0..n).map(|i| format!(r#"{{"event":"e{i}"}}"#)).collect()
}

async fn surreal() -> SurrealStore {
    SurrealStore::in_memory().await.expect("in_memory() failed")
}

// ===========================================================================
// ConfigStore contracts
// ===========================================================================

async fn config_get_after_insert(store: impl ConfigStore) {
    assert!(store.get(Kind::Flag, "a").await.unwrap().is_none());
    store.insert(record(Kind::Flag, "a", 1)).await.unwrap();

    let got = store.get(Kind::Flag, "a").await.unwrap().unwrap();
    assert_eq!(got, record(Kind::Flag, "a", 1));
}

async fn config_kinds_are_partitioned(store: impl ConfigStore) {
    store.insert(record(Kind::Flag, "shared", 1)).await.unwrap();
    store.insert(record(Kind::Segment, "shared", 7)).await.unwrap();
    store.insert(record(Kind::Segment, "other", 2)).await.unwrap();

    let flags = store.list(Kind::Flag).await.unwrap();
    assert_eq!(flags.len(), 1);
    assert_eq!(flags[0].version, 1);

    let mut segments: Vec<String> = store
        .list(Kind::Segment)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.key)
        .collect();
    segments.sort();
    assert_eq!(segments, vec!["other".to_string(), "shared".to_string()]);

    let seg = store.get(Kind::Segment, "shared").await.unwrap().unwrap();
    assert_eq!(seg.version, 7);
}

async fn config_duplicate_insert_is_rejected(store: impl ConfigStore) {
    store.insert(record(Kind::Flag, "a", 1)).await.unwrap();
    let err = store.insert(record(Kind::Flag, "a", 2)).await.unwrap_err();
    assert!(matches!(err, StorageError::DuplicateRecord { .. }));
    assert_eq!(store.get(Kind::Flag, "a").await.unwrap().unwrap().version, 1);
}

async fn config_replace_and_delete(store: impl ConfigStore) {
    store.insert(record(Kind::Flag, "a", 1)).await.unwrap();
    store.replace(record(Kind::Flag, "a", 4)).await.unwrap();
    assert_eq!(
        store.get(Kind::Flag, "a").await.unwrap().unwrap(),
        record(Kind::Flag, "a", 4)
    );

    store.delete(Kind::Flag, "a").await.unwrap();
    assert!(store.get(Kind::Flag, "a").await.unwrap().is_none());
    // Deleting again is a no-op
    store.delete(Kind::Flag, "a").await.unwrap();
}

async fn config_replace_missing_is_noop(store: impl ConfigStore) {
    store.replace(record(Kind::Flag, "ghost", 3)).await.unwrap();
    assert!(store.get(Kind::Flag, "ghost").await.unwrap().is_none());
}

async fn config_any_tracks_contents(store: impl ConfigStore) {
    assert!(!store.any().await.unwrap());
    store.insert(record(Kind::Segment, "s", 1)).await.unwrap();
    assert!(store.any().await.unwrap());
    store.delete(Kind::Segment, "s").await.unwrap();
    assert!(!store.any().await.unwrap());
}

#[tokio::test]
async fn memory_config_contracts() {
    config_get_after_insert(MemoryConfigStore::new()).await;
    config_kinds_are_partitioned(MemoryConfigStore::new()).await;
    config_duplicate_insert_is_rejected(MemoryConfigStore::new()).await;
    config_replace_and_delete(MemoryConfigStore::new()).await;
    config_replace_missing_is_noop(MemoryConfigStore::new()).await;
    config_any_tracks_contents(MemoryConfigStore::new()).await;
}

#[tokio::test]
async fn surreal_config_contracts() {
    config_get_after_insert(surreal().await).await;
    config_kinds_are_partitioned(surreal().await).await;
    config_duplicate_insert_is_rejected(surreal().await).await;
    config_replace_and_delete(surreal().await).await;
    config_replace_missing_is_noop(surreal().await).await;
    config_any_tracks_contents(surreal().await).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn surreal_racing_inserts_yield_one_row_and_duplicates() {
    for _ in 0..10 {
        let store = std::sync::Arc::new(surreal().await);
        let writers: Vec<_> = (0..8u64)
            .map(|version| {
                let store = store.clone();
                tokio::spawn(async move {
                    ConfigStore::insert(store.as_ref(), record(Kind::Flag, "k", version)).await
                })
            })
            .collect();

        let mut inserted = 0;
        for writer in writers {
            match writer.await.unwrap() {
                Ok(()) => inserted += 1,
                Err(StorageError::DuplicateRecord { kind, key }) => {
                    assert_eq!((kind.as_str(), key.as_str()), ("flags", "k"));
                }
                Err(other) => panic!("racing insert failed: {other}"),
            }
        }

        assert_eq!(inserted, 1);
        assert_eq!(ConfigStore::list(store.as_ref(), Kind::Flag).await.unwrap().len(), 1);
    }
}

// ===========================================================================
// EventStore contracts
// ===========================================================================

async fn events_are_returned_in_insertion_order(store: impl EventStore) {
    store.append(payloads(3)).await.unwrap();
    store.append(vec!["late".to_string()]).await.unwrap();

    let oldest: Vec<String> = store
        .oldest(10)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.payload)
        .collect();
    assert_eq!(
        oldest,
        vec![
            r#"{"event":"e0"}"#.to_string(),
            r#"{"event":"e1"}"#.to_string(),
            r#"{"event":"e2"}"#.to_string(),
            "late".to_string(),
        ]
    );
}

async fn events_oldest_respects_limit(store: impl EventStore) {
    let stored = store.append(payloads(5)).await.unwrap();
    let oldest = store.oldest(2).await.unwrap();
    assert_eq!(oldest.len(), 2);
    assert_eq!(oldest[0].id, stored[0].id);
    assert_eq!(oldest[1].id, stored[1].id);
    assert!(store.oldest(0).await.unwrap().is_empty());
}

async fn events_append_assigns_increasing_seq(store: impl EventStore) {
    let first = store.append(payloads(2)).await.unwrap();
    let second = store.append(payloads(2)).await.unwrap();
    let seqs: Vec<u64> = first.iter().chain(second.iter()).map(|e| e.seq).collect();
    assert!(seqs.windows(2).all(|w| w[0] < w[1]));
}

async fn events_count_is_bounded(store: impl EventStore) {
    assert_eq!(store.count(10).await.unwrap(), 0);
    store.append(payloads(4)).await.unwrap();
    assert_eq!(store.count(10).await.unwrap(), 4);
    assert_eq!(store.count(3).await.unwrap(), 3);
    assert_eq!(store.count(0).await.unwrap(), 0);
}

async fn events_delete_by_identity_keeps_order(store: impl EventStore) {
    let stored = store.append(payloads(4)).await.unwrap();
    store
        .delete(&[stored[1].id.clone(), stored[2].id.clone()])
        .await
        .unwrap();

    let remaining: Vec<EventId> = store
        .oldest(10)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.id)
        .collect();
    assert_eq!(remaining, vec![stored[0].id.clone(), stored[3].id.clone()]);

    // Unknown ids and empty slices are ignored
    store.delete(&[EventId::new()]).await.unwrap();
    store.delete(&[]).await.unwrap();
    assert_eq!(store.count(10).await.unwrap(), 2);
}

#[tokio::test]
async fn memory_event_contracts() {
    events_are_returned_in_insertion_order(MemoryEventStore::new()).await;
    events_oldest_respects_limit(MemoryEventStore::new()).await;
    events_append_assigns_increasing_seq(MemoryEventStore::new()).await;
    events_count_is_bounded(MemoryEventStore::new()).await;
    events_delete_by_identity_keeps_order(MemoryEventStore::new()).await;
}

#[tokio::test]
async fn surreal_event_contracts() {
    events_are_returned_in_insertion_order(surreal().await).await;
    events_oldest_respects_limit(surreal().await).await;
    events_append_assigns_increasing_seq(surreal().await).await;
    events_count_is_bounded(surreal().await).await;
    events_delete_by_identity_keeps_order(surreal().await).await;
}

// ===========================================================================
// ScheduleStore contracts
// ===========================================================================

async fn schedule_pointer_lifecycle(store: impl ScheduleStore) {
    assert!(store.current().await.unwrap().is_none());

    let job = JobId::new();
    store
        .insert(ScheduleRecord {
            job_id: job.clone(),
        })
        .await
        .unwrap();
    assert_eq!(store.current().await.unwrap().unwrap().job_id, job);

    // Removing a different job leaves the pointer alone
    store.remove(&JobId::new()).await.unwrap();
    assert_eq!(store.current().await.unwrap().unwrap().job_id, job);

    store.remove(&job).await.unwrap();
    assert!(store.current().await.unwrap().is_none());
}

#[tokio::test]
async fn memory_schedule_contracts() {
    schedule_pointer_lifecycle(MemoryScheduleStore::new()).await;
}

#[tokio::test]
async fn surreal_schedule_contracts() {
    schedule_pointer_lifecycle(surreal().await).await;
}

// ===========================================================================
// TokenStore contracts
// ===========================================================================

async fn token_is_stored_once(store: impl TokenStore) {
    assert!(store.current().await.unwrap().is_none());

    let record = TokenRecord {
        digest: TokenDigest::of("first"),
        created_at: Utc::now(),
    };
    store.insert(record).await.unwrap();
    assert_eq!(
        store.current().await.unwrap().unwrap().digest,
        TokenDigest::of("first")
    );

    let err = store
        .insert(TokenRecord {
            digest: TokenDigest::of("second"),
            created_at: Utc::now(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::TokenExists));
    assert_eq!(
        store.current().await.unwrap().unwrap().digest,
        TokenDigest::of("first")
    );
}

#[tokio::test]
async fn memory_token_contracts() {
    token_is_stored_once(MemoryTokenStore::new()).await;
}

#[tokio::test]
async fn surreal_token_contracts() {
    token_is_stored_once(surreal().await).await;
}

// ===========================================================================
// SurrealStore persistence
// ===========================================================================

#[tokio::test]
async fn surreal_on_disk_store_resumes_seq_from_existing_rows() {
    let dir = tempfile::tempdir().unwrap();
    let config = ConnectionConfig::local(dir.path().join("db"));
    let handle = SurrealHandle::connect(&config).await.unwrap();

    let first = SurrealStore::from_handle(handle.clone()).await.unwrap();
    ConfigStore::insert(&first, record(Kind::Flag, "persisted", 2))
        .await
        .unwrap();
    let stored = first.append(payloads(2)).await.unwrap();

    // A second store over the same database picks up where the first left off
    let second = SurrealStore::from_handle(handle).await.unwrap();
    assert!(ConfigStore::any(&second).await.unwrap());
    assert_eq!(second.count(10).await.unwrap(), 2);

    let next = second.append(vec!["after".to_string()]).await.unwrap();
    assert!(next[0].seq > stored[1].seq);
}
