//! SurrealDB Handle - Connection Setup
//!
//! Opens a SurrealDB connection through the `any` engine and runs the schema
//! migrations. Supports:
//! - `mem://` in-memory databases (tests, ephemeral deployments)
//! - `surrealkv://<path>` embedded on-disk databases
//! - `ws://` / `wss://` remote servers with root or database credentials

use surrealdb::engine::any::Any;
use surrealdb::opt::auth::{Database, Root};
use surrealdb::Surreal;
use tracing::{info, instrument};

use crate::error::StateError;
use crate::migrations;
use crate::Result;

const DEFAULT_NAMESPACE: &str = "flagsync";
const DEFAULT_DATABASE: &str = "main";

/// Credentials for a remote SurrealDB server
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    /// Whether this is a root user (true) or database user (false)
    pub is_root: bool,
}

/// Where and how to connect.
///
/// Built once by the bootstrap layer; nothing in this crate reads the
/// process environment.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Endpoint URL (e.g. "mem://", "surrealkv://.flagsync/db", "wss://host")
    pub endpoint: String,
    /// Namespace (default: "flagsync")
    pub namespace: String,
    /// Database name (default: "main")
    pub database: String,
    /// Sign-in credentials for remote servers
    pub credentials: Option<Credentials>,
}

impl ConnectionConfig {
    /// Connect to `endpoint` with the default namespace and database
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            credentials: None,
        }
    }

    /// In-memory database
    pub fn in_memory() -> Self {
        Self::new("mem://")
    }

    /// Embedded on-disk database rooted at `path`
    pub fn local(path: impl AsRef<std::path::Path>) -> Self {
        Self::new(format!("surrealkv://{}", path.as_ref().display()))
    }

    /// Set custom namespace
    pub fn with_namespace(mut self, ns: impl Into<String>) -> Self {
        self.namespace = ns.into();
        self
    }

    /// Set custom database
    pub fn with_database(mut self, db: impl Into<String>) -> Self {
        self.database = db.into();
        self
    }

    /// Sign in as a database user
    pub fn with_user(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(Credentials {
            username: username.into(),
            password: password.into(),
            is_root: false,
        });
        self
    }

    /// Sign in as a root user
    pub fn with_root(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(Credentials {
            username: username.into(),
            password: password.into(),
            is_root: true,
        });
        self
    }

    fn is_embedded(&self) -> bool {
        self.endpoint.starts_with("mem://") || self.endpoint.starts_with("surrealkv://")
    }
}

/// SurrealDB connection handle for flagsync
#[derive(Clone)]
pub struct SurrealHandle {
    db: Surreal<Any>,
}

impl SurrealHandle {
    /// Connect to an in-memory database and set up schema
    #[instrument(skip_all)]
    pub async fn setup_db() -> Result<Self> {
        Self::connect(&ConnectionConfig::in_memory()).await
    }

    /// Connect according to `config` and set up schema
    #[instrument(skip(config), fields(endpoint = %config.endpoint, namespace = %config.namespace, database = %config.database))]
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        if let Some(path) = config.endpoint.strip_prefix("surrealkv://") {
            std::fs::create_dir_all(path).map_err(|e| {
                StateError::Connection(format!(
                    "Failed to create database directory {}: {}",
                    path, e
                ))
            })?;
        }

        let db = surrealdb::engine::any::connect(config.endpoint.as_str())
            .await
            .map_err(|e| {
                StateError::Connection(format!("Failed to connect to {}: {}", config.endpoint, e))
            })?;

        match &config.credentials {
            Some(creds) if creds.is_root => {
                db.signin(Root {
                    username: &creds.username,
                    password: &creds.password,
                })
                .await
                .map_err(|e| {
                    StateError::Connection(format!("Root authentication failed: {}", e))
                })?;
            }
            Some(creds) => {
                db.signin(Database {
                    namespace: &config.namespace,
                    database: &config.database,
                    username: &creds.username,
                    password: &creds.password,
                })
                .await
                .map_err(|e| {
                    StateError::Connection(format!("Database authentication failed: {}", e))
                })?;
            }
            None if !config.is_embedded() => {
                info!("Connecting to remote SurrealDB without credentials");
            }
            None => {}
        }

        db.use_ns(&config.namespace)
            .use_db(&config.database)
            .await
            .map_err(|e| {
                StateError::Connection(format!("Failed to select namespace/database: {}", e))
            })?;

        migrations::init_schema(&db).await?;

        info!("SurrealDB connected and schema initialized");
        Ok(SurrealHandle { db })
    }

    /// Underlying client
    pub fn db(&self) -> &Surreal<Any> {
        &self.db
    }
}
