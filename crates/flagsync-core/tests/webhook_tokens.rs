//! Token issuance, validation and the token-gated webhook.

use std::sync::Arc;

use flagsync_core::tokens::{TOKEN_NOT_FOUND, TOKEN_NOT_PROVIDED};
use flagsync_core::{
    Mirror, StoredTokenValidator, SyncError, TokenCheck, TokenValidator, WebhookHandler,
};
use flagsync_state::fakes::{MemoryConfigStore, MemoryTokenStore};
use flagsync_state::{Kind, StorageError, SurrealStore, TokenStore};

const BODY: &str = r#"{
    "flags": {"f": {"key": "f", "version": 1, "on": true}},
    "segments": {"s": {"key": "s", "version": 1}}
}"#;

struct Fixture {
    tokens: Arc<MemoryTokenStore>,
    validator: Arc<StoredTokenValidator>,
    mirror: Arc<Mirror>,
    webhook: WebhookHandler,
}

fn fixture() -> Fixture {
    let tokens = Arc::new(MemoryTokenStore::new());
    let validator = Arc::new(StoredTokenValidator::new(tokens.clone()));
    let mirror = Arc::new(Mirror::new(Arc::new(MemoryConfigStore::new())));
    let webhook = WebhookHandler::new(validator.clone(), mirror.clone());
    Fixture {
        tokens,
        validator,
        mirror,
        webhook,
    }
}

#[tokio::test]
async fn generated_token_validates() {
    let f = fixture();
    let token = f.validator.generate().await.unwrap();

    assert_eq!(uuid::Uuid::parse_str(&token).unwrap().get_version_num(), 4);
    assert_eq!(
        f.validator.validate(Some(token.as_str())).await.unwrap(),
        TokenCheck::ok()
    );

    // Only the digest is stored.
    let stored = f.tokens.current().await.unwrap().unwrap();
    assert_ne!(stored.digest.as_str(), token);
}

#[tokio::test]
async fn second_token_is_refused() {
    let f = fixture();
    let first = f.validator.generate().await.unwrap();

    let err = f.validator.generate().await.unwrap_err();
    assert!(matches!(err, SyncError::Storage(StorageError::TokenExists)));
    assert!(f.validator.validate(Some(first.as_str())).await.unwrap().success);
}

#[tokio::test]
async fn validation_messages() {
    let f = fixture();

    let missing = f.validator.validate(None).await.unwrap();
    assert!(!missing.success);
    assert_eq!(missing.error.as_deref(), Some(TOKEN_NOT_PROVIDED));

    let empty = f.validator.validate(Some("")).await.unwrap();
    assert_eq!(empty.error.as_deref(), Some(TOKEN_NOT_PROVIDED));

    let not_issued = f.validator.validate(Some("anything")).await.unwrap();
    assert!(!not_issued.success);
    assert_eq!(not_issued.error.as_deref(), Some(TOKEN_NOT_FOUND));

    f.validator.generate().await.unwrap();
    let wrong = f.validator.validate(Some("anything")).await.unwrap();
    assert!(!wrong.success);
    assert_eq!(wrong.error, None);
}

#[tokio::test]
async fn authorized_update_reconciles() {
    let f = fixture();
    let token = f.validator.generate().await.unwrap();
    let header = format!("Bearer {token}");

    let check = f.webhook.validate(Some(header.as_str())).await.unwrap();
    assert!(check.success);

    let report = f.webhook.receive_update(Some(header.as_str()), BODY).await.unwrap();
    assert_eq!(report.inserted, 2);
    assert!(f.mirror.get(Kind::Flag, "f").await.unwrap().is_some());
    assert!(f.mirror.get(Kind::Segment, "s").await.unwrap().is_some());
}

#[tokio::test]
async fn rejected_update_mutates_nothing() {
    let f = fixture();
    f.validator.generate().await.unwrap();

    let err = f
        .webhook
        .receive_update(Some("Bearer wrong"), BODY)
        .await
        .unwrap_err();
    let SyncError::Unauthorized { errors } = &err else {
        panic!("expected Unauthorized, got {err:?}");
    };
    assert!(errors.is_empty());
    assert_eq!(err.to_error_body(), serde_json::json!({"errors": []}));

    let err = f.webhook.receive_update(None, BODY).await.unwrap_err();
    assert!(
        matches!(&err, SyncError::Unauthorized { errors } if errors == &vec![TOKEN_NOT_PROVIDED.to_string()])
    );

    let err = f
        .webhook
        .receive_update(Some("Basic abc"), BODY)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Unauthorized { .. }));

    assert!(!f.mirror.is_initialized().await.unwrap());
}

#[tokio::test]
async fn validate_without_issued_token_reports_setup_hint() {
    let f = fixture();
    let err = f.webhook.validate(Some("Bearer abc")).await.unwrap_err();
    assert_eq!(
        err.to_error_body(),
        serde_json::json!({"errors": [TOKEN_NOT_FOUND]})
    );
}

#[tokio::test]
async fn malformed_body_is_rejected_after_auth() {
    let f = fixture();
    let token = f.validator.generate().await.unwrap();

    let err = f
        .webhook
        .receive_update(Some(format!("Bearer {token}").as_str()), "{not json")
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidSnapshot(_)));
    assert!(!f.mirror.is_initialized().await.unwrap());
}

#[tokio::test]
async fn surreal_token_store_round_trip() {
    let store = Arc::new(SurrealStore::in_memory().await.unwrap());
    let validator = StoredTokenValidator::new(store);

    let token = validator.generate().await.unwrap();
    assert!(validator.validate(Some(token.as_str())).await.unwrap().success);
    assert!(!validator.validate(Some("other")).await.unwrap().success);
}
