//! Inbound configuration snapshots.
//!
//! A snapshot is the full desired state of both kinds at one point in time:
//! `{"flags": {key: item}, "segments": {key: item}}`. Each item is kept as
//! raw JSON; only `key`, `version` and `deleted` are interpreted here.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use flagsync_state::Kind;

use crate::error::{Result, SyncError};

/// Full-replacement view of upstream flags and segments.
///
/// A missing section deserializes as empty, which removes every record of
/// that kind on reconcile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub flags: Map<String, Value>,
    #[serde(default)]
    pub segments: Map<String, Value>,
}

impl Snapshot {
    /// Parse a snapshot body.
    pub fn from_json(body: &str) -> Result<Self> {
        serde_json::from_str(body).map_err(|e| SyncError::InvalidSnapshot(e.to_string()))
    }

    pub fn items(&self, kind: Kind) -> &Map<String, Value> {
        match kind {
            Kind::Flag => &self.flags,
            Kind::Segment => &self.segments,
        }
    }

    /// Add an item under its own `key`.
    pub fn with_item(mut self, kind: Kind, item: Value) -> Result<Self> {
        let key = item_key(&item)
            .ok_or_else(|| SyncError::InvalidSnapshot("item has no key".to_string()))?
            .to_string();
        match kind {
            Kind::Flag => self.flags.insert(key, item),
            Kind::Segment => self.segments.insert(key, item),
        };
        Ok(self)
    }
}

/// The item's `key` field, if it is a non-empty string.
pub fn item_key(item: &Value) -> Option<&str> {
    item.get("key")
        .and_then(Value::as_str)
        .filter(|key| !key.is_empty())
}

/// The item's `version`. Missing or non-integer versions count as 0.
pub fn item_version(item: &Value) -> u64 {
    item.get("version").and_then(Value::as_u64).unwrap_or(0)
}

/// True for a deletion tombstone (`"deleted": true`).
pub fn is_tombstone(item: &Value) -> bool {
    item.get("deleted").and_then(Value::as_bool).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_both_sections() {
        let snap = Snapshot::from_json(
            r#"{"flags":{"f":{"key":"f","version":2}},"segments":{"s":{"key":"s","version":1}}}"#,
        )
        .unwrap();
        assert_eq!(snap.items(Kind::Flag).len(), 1);
        assert_eq!(snap.items(Kind::Segment).len(), 1);
    }

    #[test]
    fn missing_section_is_empty() {
        let snap = Snapshot::from_json(r#"{"flags":{}}"#).unwrap();
        assert!(snap.items(Kind::Segment).is_empty());
    }

    #[test]
    fn garbage_is_invalid_snapshot() {
        assert!(matches!(
            Snapshot::from_json("not json"),
            Err(SyncError::InvalidSnapshot(_))
        ));
        assert!(matches!(
            Snapshot::from_json(r#"{"flags":[1,2]}"#),
            Err(SyncError::InvalidSnapshot(_))
        ));
    }

    #[test]
    fn field_extraction() {
        let item = json!({"key": "a", "version": 7, "deleted": true});
        assert_eq!(item_key(&item), Some("a"));
        assert_eq!(item_version(&item), 7);
        assert!(is_tombstone(&item));

        let bare = json!({"key": ""});
        assert_eq!(item_key(&bare), None);
        assert_eq!(item_version(&bare), 0);
        assert!(!is_tombstone(&bare));
        assert_eq!(item_version(&json!({"version": -3})), 0);
    }

    #[test]
    fn with_item_requires_key() {
        let snap = Snapshot::default()
            .with_item(Kind::Flag, json!({"key": "a", "version": 1}))
            .unwrap();
        assert!(snap.flags.contains_key("a"));
        assert!(Snapshot::default()
            .with_item(Kind::Flag, json!({"version": 1}))
            .is_err());
    }
}
