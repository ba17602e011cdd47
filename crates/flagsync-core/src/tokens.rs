//! Webhook token issuance and validation.
//!
//! Only a SHA-256 digest of the token is stored. The plaintext is returned
//! once by [`StoredTokenValidator::generate`] and never persisted.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use flagsync_state::{TokenDigest, TokenRecord, TokenStore};

use crate::error::Result;

pub const TOKEN_NOT_PROVIDED: &str =
    "Token not provided. Pass a token in the Authorization header.";
pub const TOKEN_NOT_FOUND: &str =
    "Token not found. Run the tokens:generate function to create a token.";

/// Outcome of a token check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCheck {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TokenCheck {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    fn rejected(error: Option<&str>) -> Self {
        Self {
            success: false,
            error: error.map(str::to_string),
        }
    }
}

/// Decides whether an inbound write is authorized.
#[async_trait]
pub trait TokenValidator: Send + Sync {
    async fn validate(&self, token: Option<&str>) -> Result<TokenCheck>;
}

/// Validator backed by the single stored token digest.
pub struct StoredTokenValidator {
    store: Arc<dyn TokenStore>,
}

impl StoredTokenValidator {
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        Self { store }
    }

    /// Issue a random token. Fails if one already exists.
    pub async fn generate(&self) -> Result<String> {
        let token = uuid::Uuid::new_v4().to_string();
        self.store
            .insert(TokenRecord {
                digest: TokenDigest::of(&token),
                created_at: Utc::now(),
            })
            .await?;
        info!("Generated webhook token");
        Ok(token)
    }
}

#[async_trait]
impl TokenValidator for StoredTokenValidator {
    async fn validate(&self, token: Option<&str>) -> Result<TokenCheck> {
        let Some(token) = token.filter(|t| !t.is_empty()) else {
            return Ok(TokenCheck::rejected(Some(TOKEN_NOT_PROVIDED)));
        };
        let Some(stored) = self.store.current().await? else {
            return Ok(TokenCheck::rejected(Some(TOKEN_NOT_FOUND)));
        };
        if stored.digest == TokenDigest::of(token) {
            Ok(TokenCheck::ok())
        } else {
            Ok(TokenCheck::rejected(None))
        }
    }
}
