//! Remote collector transport.
//!
//! [`HttpTransport`] posts a batch as one JSON array to `{eventsUri}/bulk`.
//! Context attributes marked private are stripped before anything leaves
//! the process; their names are listed under `_meta.redactedAttributes`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use flagsync_state::EventRecord;

use crate::error::{Result, SyncError};
use crate::options::{DeliveryArgs, DeliveryOptions};

/// Event schema version understood by the collector.
pub const EVENT_SCHEMA: &str = "4";

const SCHEMA_HEADER: &str = "X-LaunchDarkly-Event-Schema";
const PAYLOAD_ID_HEADER: &str = "X-LaunchDarkly-Payload-ID";
const USER_AGENT: &str = concat!("flagsync/", env!("CARGO_PKG_VERSION"));

/// Sends a batch of events to the remote collector.
///
/// The whole batch succeeds or fails as a unit.
#[async_trait]
pub trait EventTransport: Send + Sync {
    async fn send(&self, batch: &[EventRecord], args: &DeliveryArgs) -> Result<()>;
}

/// HTTP transport backed by `reqwest`.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a client whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| SyncError::Transmit(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EventTransport for HttpTransport {
    async fn send(&self, batch: &[EventRecord], args: &DeliveryArgs) -> Result<()> {
        let url = bulk_url(args.options.events_uri());
        let body = build_body(batch, &args.options);
        let payload_id = uuid::Uuid::new_v4().to_string();

        debug!(url = %url, events = body.len(), payload_id = %payload_id, "Posting event batch");
        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, args.delivery_key.as_str())
            .header(SCHEMA_HEADER, EVENT_SCHEMA)
            .header(PAYLOAD_ID_HEADER, payload_id.as_str())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SyncError::Transmit(format!("request to {url} timed out"))
                } else {
                    SyncError::Transmit(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = %status, url = %url, "Collector rejected event batch");
            return Err(SyncError::Transmit(format!(
                "collector responded with {status}"
            )));
        }
        Ok(())
    }
}

fn bulk_url(events_uri: &str) -> String {
    format!("{}/bulk", events_uri.trim_end_matches('/'))
}

/// JSON array sent to the collector. Payloads that are not JSON are sent as strings.
pub fn build_body(batch: &[EventRecord], options: &DeliveryOptions) -> Vec<Value> {
    batch
        .iter()
        .map(|event| match serde_json::from_str::<Value>(&event.payload) {
            Ok(mut value) => {
                redact_event(&mut value, options);
                value
            }
            Err(_) => Value::String(event.payload.clone()),
        })
        .collect()
}

// Attributes that identify a context and are never redacted.
const PROTECTED: [&str; 4] = ["kind", "key", "anonymous", "_meta"];

/// Strip private attributes from the event's `context`, if it has one.
pub fn redact_event(event: &mut Value, options: &DeliveryOptions) {
    let Some(context) = event.get_mut("context") else {
        return;
    };
    let all = options.all_attributes_private();
    let private = options.private_attributes();

    let is_multi = context.get("kind").and_then(Value::as_str) == Some("multi");
    let Some(obj) = context.as_object_mut() else {
        return;
    };

    if is_multi {
        for (name, single) in obj.iter_mut() {
            if name != "kind" {
                if let Some(single) = single.as_object_mut() {
                    redact_context(single, all, private);
                }
            }
        }
    } else {
        redact_context(obj, all, private);
    }
}

fn redact_context(context: &mut Map<String, Value>, all: bool, private: &[String]) {
    let mut meta = match context.remove("_meta") {
        Some(Value::Object(meta)) => meta,
        _ => Map::new(),
    };
    let own: Vec<String> = meta
        .remove("privateAttributes")
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default();

    let is_private = |name: &str| {
        let pointer = format!("/{name}");
        all || private
            .iter()
            .chain(own.iter())
            .any(|p| p == name || *p == pointer)
    };

    let mut redacted: Vec<String> = context
        .keys()
        .filter(|name| !PROTECTED.contains(&name.as_str()) && is_private(name.as_str()))
        .cloned()
        .collect();
    for name in &redacted {
        context.remove(name);
    }

    if !redacted.is_empty() {
        redacted.sort();
        meta.insert(
            "redactedAttributes".to_string(),
            Value::Array(redacted.into_iter().map(Value::String).collect()),
        );
    }
    if !meta.is_empty() {
        context.insert("_meta".to_string(), Value::Object(meta));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use flagsync_state::EventId;
    use serde_json::json;

    fn options(all: bool, private: &[&str]) -> DeliveryOptions {
        DeliveryOptions {
            all_attributes_private: Some(all),
            private_attributes: Some(private.iter().map(|s| s.to_string()).collect()),
            ..Default::default()
        }
    }

    #[test]
    fn bulk_url_tolerates_trailing_slash() {
        assert_eq!(bulk_url("https://events.example"), "https://events.example/bulk");
        assert_eq!(bulk_url("https://events.example/"), "https://events.example/bulk");
    }

    #[test]
    fn named_private_attributes_are_removed() {
        let mut event = json!({
            "kind": "feature",
            "context": {"kind": "user", "key": "u1", "email": "a@b.c", "name": "Ann"}
        });
        redact_event(&mut event, &options(false, &["email"]));
        assert_eq!(
            event["context"],
            json!({
                "kind": "user",
                "key": "u1",
                "name": "Ann",
                "_meta": {"redactedAttributes": ["email"]}
            })
        );
    }

    #[test]
    fn all_private_keeps_only_identity() {
        let mut event = json!({
            "context": {"kind": "user", "key": "u1", "anonymous": true, "email": "x", "name": "y"}
        });
        redact_event(&mut event, &options(true, &[]));
        assert_eq!(
            event["context"],
            json!({
                "kind": "user",
                "key": "u1",
                "anonymous": true,
                "_meta": {"redactedAttributes": ["email", "name"]}
            })
        );
    }

    #[test]
    fn context_level_private_attributes_and_pointers() {
        let mut event = json!({
            "context": {
                "kind": "multi",
                "user": {"kind": "user", "key": "u", "ssn": "1", "_meta": {"privateAttributes": ["ssn"]}},
                "org": {"key": "o", "plan": "gold", "region": "eu"}
            }
        });
        redact_event(&mut event, &options(false, &["/region"]));
        assert_eq!(
            event["context"]["user"],
            json!({"kind": "user", "key": "u", "_meta": {"redactedAttributes": ["ssn"]}})
        );
        assert_eq!(
            event["context"]["org"],
            json!({"key": "o", "plan": "gold", "_meta": {"redactedAttributes": ["region"]}})
        );
    }

    #[test]
    fn events_without_context_are_untouched() {
        let mut event = json!({"kind": "summary", "features": {}});
        let before = event.clone();
        redact_event(&mut event, &options(true, &[]));
        assert_eq!(event, before);
    }

    #[test]
    fn non_json_payloads_are_sent_as_strings() {
        let batch = vec![
            EventRecord {
                id: EventId::new(),
                seq: 1,
                payload: r#"{"kind":"custom"}"#.to_string(),
                created_at: Utc::now(),
            },
            EventRecord {
                id: EventId::new(),
                seq: 2,
                payload: "raw".to_string(),
                created_at: Utc::now(),
            },
        ];
        let body = build_body(&batch, &DeliveryOptions::default());
        assert_eq!(body, vec![json!({"kind": "custom"}), json!("raw")]);
    }
}
