//! Error taxonomy for the sync and delivery engine.

use flagsync_state::StorageError;

/// Errors produced by the mirror, the event pipeline and the webhook surface.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// A namespace that maps to neither flags nor segments. Programming error.
    #[error("unsupported data kind: {0}")]
    UnsupportedKind(String),

    #[error("invalid delivery options: {0}")]
    InvalidOptions(String),

    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("unauthorized: {}", errors.join("; "))]
    Unauthorized { errors: Vec<String> },

    #[error("event transmit failed: {0}")]
    Transmit(String),

    #[error("scheduler error: {0}")]
    Scheduler(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncError {
    /// JSON body for a rejected webhook call: `{"errors": [...]}`.
    ///
    /// Only meaningful for [`SyncError::Unauthorized`]; other variants render
    /// their display string as the single error.
    pub fn to_error_body(&self) -> serde_json::Value {
        let errors = match self {
            SyncError::Unauthorized { errors } => errors.clone(),
            other => vec![other.to_string()],
        };
        serde_json::json!({ "errors": errors })
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
