//! Inbound webhook handling.
//!
//! Route wiring lives with the host; this module turns an `Authorization`
//! header and a body into an authorized reconcile or a structured rejection.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{Result, SyncError};
use crate::mirror::{Mirror, ReconcileReport};
use crate::snapshot::Snapshot;
use crate::tokens::{TokenCheck, TokenValidator};

/// Extract the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(authorization: Option<&str>) -> Option<&str> {
    authorization
        .and_then(|header| header.split_once("Bearer "))
        .map(|(_, token)| token.trim())
        .filter(|token| !token.is_empty())
}

/// Authorizes and applies inbound snapshot pushes.
pub struct WebhookHandler {
    validator: Arc<dyn TokenValidator>,
    mirror: Arc<Mirror>,
}

impl WebhookHandler {
    pub fn new(validator: Arc<dyn TokenValidator>, mirror: Arc<Mirror>) -> Self {
        Self { validator, mirror }
    }

    /// Check the caller's token without touching the mirror.
    pub async fn validate(&self, authorization: Option<&str>) -> Result<TokenCheck> {
        self.authorize(authorization).await?;
        Ok(TokenCheck::ok())
    }

    /// Authorize, parse and reconcile a full snapshot.
    ///
    /// Nothing is written unless the token is valid and the body parses.
    pub async fn receive_update(
        &self,
        authorization: Option<&str>,
        body: &str,
    ) -> Result<ReconcileReport> {
        self.authorize(authorization).await?;
        let snapshot = Snapshot::from_json(body)?;
        let report = self.mirror.reconcile(&snapshot).await?;
        info!(mutations = report.mutations(), "Applied webhook update");
        Ok(report)
    }

    async fn authorize(&self, authorization: Option<&str>) -> Result<()> {
        let check = self.validator.validate(bearer_token(authorization)).await?;
        if check.success {
            return Ok(());
        }
        warn!(reason = ?check.error, "Rejected webhook call");
        Err(SyncError::Unauthorized {
            errors: check.error.into_iter().collect(),
        })
    }
}
