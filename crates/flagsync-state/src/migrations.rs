//! SurrealDB schema migrations and initialization
//!
//! Sets up the four flagsync tables with their indexes. Every statement uses
//! `IF NOT EXISTS`, so running the migrations again on an existing database
//! leaves it untouched.

use crate::error::StateError;
use crate::Result;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

/// Initialize all flagsync tables in SurrealDB
pub async fn init_schema(db: &Surreal<Any>) -> Result<()> {
    info!("Initializing flagsync SurrealDB schema");

    init_config_records_table(db).await?;
    init_events_table(db).await?;
    init_event_schedule_table(db).await?;
    init_tokens_table(db).await?;

    info!("flagsync schema initialization complete");
    Ok(())
}

async fn run(db: &Surreal<Any>, sql: &str) -> Result<()> {
    db.query(sql)
        .await
        .and_then(|response| response.check())
        .map_err(|e| StateError::SchemaSetup(e.to_string()))?;
    Ok(())
}

/// Initialize `config_records` table
///
/// Schema:
/// ```text
/// TABLE config_records {
///   kind:        STRING ("flags" | "segments")
///   record_key:  STRING
///   version:     INT
///   payload:     STRING (serialized item)
/// }
/// ```
///
/// Constraints:
/// - `(kind, record_key)` is unique
/// - version comparison is enforced by the reconciler, not the database
async fn init_config_records_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing config_records table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS config_records SCHEMALESS;

        DEFINE INDEX IF NOT EXISTS idx_kind_key ON TABLE config_records COLUMNS kind, record_key UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_kind ON TABLE config_records COLUMNS kind;
    "#;

    run(db, sql).await?;
    info!("✓ config_records table initialized");
    Ok(())
}

/// Initialize `events` table
///
/// Schema:
/// ```text
/// TABLE events {
///   event_id:    STRING (unique)
///   seq:         INT (insertion order)
///   payload:     STRING
///   created_at:  DATETIME
/// }
/// ```
async fn init_events_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing events table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS events SCHEMALESS;

        DEFINE INDEX IF NOT EXISTS idx_event_id ON TABLE events COLUMNS event_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_seq ON TABLE events COLUMNS seq UNIQUE;
    "#;

    run(db, sql).await?;
    info!("✓ events table initialized");
    Ok(())
}

/// Initialize `event_schedule` table (single row: pointer to the delivery job)
async fn init_event_schedule_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing event_schedule table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS event_schedule SCHEMALESS;

        DEFINE INDEX IF NOT EXISTS idx_job_id ON TABLE event_schedule COLUMNS job_id UNIQUE;
    "#;

    run(db, sql).await?;
    info!("✓ event_schedule table initialized");
    Ok(())
}

/// Initialize `tokens` table (single row: digest of the webhook token)
async fn init_tokens_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing tokens table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS tokens SCHEMALESS;
    "#;

    run(db, sql).await?;
    info!("✓ tokens table initialized");
    Ok(())
}
