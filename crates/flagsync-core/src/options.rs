//! Delivery options and the arguments bound to a delivery job.
//!
//! Every knob is optional; unset values fall back to the defaults below.
//! Options are validated once at enqueue time and compared structurally by
//! the delivery scheduler to detect stale jobs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

/// Maximum live events awaiting delivery.
pub const DEFAULT_EVENT_CAPACITY: usize = 1000;

/// Events sent per delivery job run.
pub const DEFAULT_EVENT_BATCH_SIZE: usize = 100;

/// Hard ceiling on a batch, bounded by how many rows one storage call may touch.
pub const MAX_EVENT_BATCH_SIZE: usize = 4000;

/// Delay before a non-immediate delivery job runs.
pub const DEFAULT_PROCESSING_INTERVAL_SECS: f64 = 5.0;

/// Collector used when `eventsUri` is unset.
pub const DEFAULT_EVENTS_URI: &str = "https://events.launchdarkly.com";

/// Tunables for event buffering and delivery.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub all_attributes_private: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_attributes: Option<Vec<String>>,

    /// Base URL of the remote collector. Most deployments leave this unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events_uri: Option<String>,

    /// Events beyond this many live records are dropped on arrival.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_capacity: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_batch_size: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_processing_interval_seconds: Option<f64>,
}

impl DeliveryOptions {
    /// Check every set knob.
    ///
    /// Rules:
    /// - `eventsUri` parses as an absolute URL
    /// - `eventProcessingIntervalSeconds > 0` and fits in a `Duration`
    /// - `eventCapacity > 0`, and `> eventBatchSize` when both are set
    /// - `0 < eventBatchSize <= 4000`
    pub fn validate(&self) -> Result<()> {
        if let Some(uri) = &self.events_uri {
            reqwest::Url::parse(uri)
                .map_err(|_| invalid("eventsUri must be a valid URL"))?;
        }

        if let Some(interval) = self.event_processing_interval_seconds {
            if !interval.is_finite() || interval <= 0.0 {
                return Err(invalid(
                    "eventProcessingIntervalSeconds must be a positive number",
                ));
            }
            if Duration::try_from_secs_f64(interval).is_err() {
                return Err(invalid("eventProcessingIntervalSeconds is too large"));
            }
        }

        if let Some(capacity) = self.event_capacity {
            if capacity == 0 {
                return Err(invalid("eventCapacity must be a positive number"));
            }
            if let Some(batch) = self.event_batch_size {
                if capacity <= batch {
                    return Err(invalid(
                        "eventCapacity must be greater than eventBatchSize",
                    ));
                }
            }
        }

        if let Some(batch) = self.event_batch_size {
            if batch == 0 {
                return Err(invalid("eventBatchSize must be a positive number"));
            }
            if batch > MAX_EVENT_BATCH_SIZE {
                return Err(invalid(
                    "eventBatchSize must be less than or equal to 4000",
                ));
            }
        }

        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.event_capacity.unwrap_or(DEFAULT_EVENT_CAPACITY)
    }

    /// Effective batch size, never above [`MAX_EVENT_BATCH_SIZE`].
    pub fn batch_size(&self) -> usize {
        self.event_batch_size
            .unwrap_or(DEFAULT_EVENT_BATCH_SIZE)
            .min(MAX_EVENT_BATCH_SIZE)
    }

    /// Delay before a scheduled delivery; saturates instead of overflowing.
    pub fn interval(&self) -> Duration {
        let secs = self
            .event_processing_interval_seconds
            .unwrap_or(DEFAULT_PROCESSING_INTERVAL_SECS);
        Duration::try_from_secs_f64(secs).unwrap_or(if secs > 0.0 {
            Duration::MAX
        } else {
            Duration::ZERO
        })
    }

    pub fn events_uri(&self) -> &str {
        self.events_uri.as_deref().unwrap_or(DEFAULT_EVENTS_URI)
    }

    pub fn all_attributes_private(&self) -> bool {
        self.all_attributes_private.unwrap_or(false)
    }

    pub fn private_attributes(&self) -> &[String] {
        self.private_attributes.as_deref().unwrap_or(&[])
    }
}

fn invalid(message: &str) -> SyncError {
    SyncError::InvalidOptions(message.to_string())
}

/// Arguments a delivery job is scheduled with.
///
/// Two jobs are interchangeable iff their args are structurally equal.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryArgs {
    /// Server-side key used to authenticate with the collector.
    pub delivery_key: String,
    #[serde(default)]
    pub options: DeliveryOptions,
}

impl DeliveryArgs {
    pub fn new(delivery_key: impl Into<String>, options: DeliveryOptions) -> Self {
        Self {
            delivery_key: delivery_key.into(),
            options,
        }
    }
}

// The delivery key is a secret; keep it out of logs.
impl std::fmt::Debug for DeliveryArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryArgs")
            .field("delivery_key", &"<redacted>")
            .field("options", &self.options)
            .finish()
    }
}
