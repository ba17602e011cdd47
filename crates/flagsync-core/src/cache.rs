//! Read-through cache scoped to one evaluation context.
//!
//! Create one [`ReadThroughCache`] per evaluation and drop it afterwards.
//! Per kind it moves from unknown, to partial (single keys memoized), to
//! complete (an `all` read happened). Once complete, that kind is never read
//! from storage again in this context.
//!
//! Lookups never fail on bad data: storage errors and undecodable payloads
//! degrade to "absent" so the evaluation engine can fall back to defaults.
//! Only an unsupported namespace is an error.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, error};

use flagsync_state::Kind;

use crate::error::Result;
use crate::kind::KindExt;
use crate::mirror::Mirror;
use crate::snapshot::{is_tombstone, item_key};

/// Storage interface consumed by the flag evaluation engine.
#[async_trait]
pub trait FeatureStore: Send + Sync {
    /// One item by namespace and key; `None` if absent or deleted.
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>>;

    /// Every live item of a namespace, keyed by item key.
    async fn all(&self, namespace: &str) -> Result<HashMap<String, Value>>;

    /// True once the mirror holds any data.
    async fn initialized(&self) -> bool;

    fn description(&self) -> &str;
}

#[derive(Debug, Default)]
struct KindMemo {
    complete: bool,
    // `None` memoizes a confirmed absence.
    items: HashMap<String, Option<Value>>,
}

#[derive(Debug, Default)]
struct ContextState {
    checked_initialized: bool,
    flags: KindMemo,
    segments: KindMemo,
}

impl ContextState {
    fn memo(&mut self, kind: Kind) -> &mut KindMemo {
        match kind {
            Kind::Flag => &mut self.flags,
            Kind::Segment => &mut self.segments,
        }
    }
}

/// Per-context memoizing view of the [`Mirror`].
pub struct ReadThroughCache {
    mirror: Arc<Mirror>,
    description: String,
    // Held across the storage read so concurrent lookups share one read.
    state: Mutex<ContextState>,
}

impl ReadThroughCache {
    pub fn new(mirror: Arc<Mirror>, description: impl Into<String>) -> Self {
        Self {
            mirror,
            description: description.into(),
            state: Mutex::new(ContextState::default()),
        }
    }

    /// Item for `(kind, key)`, reading storage at most once per key.
    pub async fn get_item(&self, kind: Kind, key: &str) -> Option<Value> {
        let mut state = self.state.lock().await;
        self.check_initialized(&mut state).await;

        let memo = state.memo(kind);
        if memo.complete {
            debug!(kind = %kind, key = %key, "Serving item from complete cache");
            return memo.items.get(key).cloned().flatten();
        }
        if let Some(hit) = memo.items.get(key) {
            debug!(kind = %kind, key = %key, "Serving item from cache");
            return hit.clone();
        }

        debug!(kind = %kind, key = %key, "Requesting item");
        let payload = match self.mirror.get(kind, key).await {
            Ok(payload) => payload,
            Err(e) => {
                error!(kind = %kind, key = %key, error = %e, "Item lookup failed");
                return None;
            }
        };
        let item = payload.and_then(|p| decode(kind, key, &p));
        memo.items.insert(key.to_string(), item.clone());
        item
    }

    /// Every live item of `kind`, reading storage at most once.
    pub async fn all_items(&self, kind: Kind) -> HashMap<String, Value> {
        let mut state = self.state.lock().await;
        self.check_initialized(&mut state).await;

        let memo = state.memo(kind);
        if memo.complete {
            debug!(kind = %kind, "Serving all items from cache");
            return live_items(&memo.items);
        }

        debug!(kind = %kind, "Requesting all items");
        let payloads = match self.mirror.get_all(kind).await {
            Ok(payloads) => payloads,
            Err(e) => {
                error!(kind = %kind, error = %e, "Listing items failed");
                return HashMap::new();
            }
        };

        let mut items = HashMap::with_capacity(payloads.len());
        for payload in &payloads {
            let Ok(value) = serde_json::from_str::<Value>(payload) else {
                error!(kind = %kind, "Failed to deserialize stored item");
                continue;
            };
            let Some(key) = item_key(&value).map(str::to_string) else {
                error!(kind = %kind, "Stored item has no key");
                continue;
            };
            let item = if is_tombstone(&value) { None } else { Some(value) };
            items.insert(key, item);
        }

        memo.items = items;
        memo.complete = true;
        live_items(&memo.items)
    }

    async fn check_initialized(&self, state: &mut ContextState) {
        if state.checked_initialized {
            return;
        }
        state.checked_initialized = true;
        if !self.initialized().await {
            error!(
                store = %self.description,
                "The flag data store has not been initialized. Is the integration configured?"
            );
        }
    }
}

fn decode(kind: Kind, key: &str, payload: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(payload) {
        Ok(value) if is_tombstone(&value) => None,
        Ok(value) => Some(value),
        Err(e) => {
            error!(kind = %kind, key = %key, error = %e, "Failed to deserialize stored item");
            None
        }
    }
}

fn live_items(items: &HashMap<String, Option<Value>>) -> HashMap<String, Value> {
    items
        .iter()
        .filter_map(|(k, v)| v.clone().map(|v| (k.clone(), v)))
        .collect()
}

#[async_trait]
impl FeatureStore for ReadThroughCache {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>> {
        let kind = Kind::from_namespace(namespace)?;
        Ok(self.get_item(kind, key).await)
    }

    async fn all(&self, namespace: &str) -> Result<HashMap<String, Value>> {
        let kind = Kind::from_namespace(namespace)?;
        Ok(self.all_items(kind).await)
    }

    async fn initialized(&self) -> bool {
        match self.mirror.is_initialized().await {
            Ok(initialized) => initialized,
            Err(e) => {
                error!(error = %e, "Initialization check failed");
                false
            }
        }
    }

    fn description(&self) -> &str {
        &self.description
    }
}
