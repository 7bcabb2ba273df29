//! SQLite persistence for the callback audit trail.
//!
//! The repository layer translates between domain records and table rows.
//! All writes go through [`Storage::write_callback`], which appends the audit
//! row and the normalized message row in one transaction.

use std::{path::PathBuf, sync::Arc, time::Duration};

use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    SqlitePool,
};
use tracing::{debug, info, instrument};

pub mod audit_log;
pub mod messages;
pub mod schema;

use crate::{
    error::Result,
    models::{AuditRecord, MessageRecord},
};

/// Connection settings for the SQLite database file.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Path to the database file, created if missing.
    pub path: PathBuf,
    /// Maximum pooled connections.
    pub max_connections: u32,
    /// How long a writer waits on a locked database before failing.
    pub busy_timeout: Duration,
}

impl StorageConfig {
    /// Creates a configuration for `path` with default pool settings.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), max_connections: 5, busy_timeout: Duration::from_secs(5) }
    }

    /// Per-connection options. Secure delete is set on every connection the
    /// pool opens, since SQLite pragmas are connection-scoped.
    pub fn connect_options(&self) -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            .filename(&self.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(self.busy_timeout)
            .pragma("secure_delete", "ON")
    }
}

/// Entry point for all database operations.
#[derive(Clone)]
pub struct Storage {
    pool: Arc<SqlitePool>,

    /// Repository for forensic audit rows.
    pub audit_log: Arc<audit_log::Repository>,

    /// Repository for normalized message rows.
    pub messages: Arc<messages::Repository>,
}

impl Storage {
    /// Opens the connection pool described by `config`.
    ///
    /// The pool is process-wide and lives until [`Storage::close`].
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the file cannot be opened or created.
    pub async fn connect(config: &StorageConfig) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(config.connect_options())
            .await?;

        info!(
            path = %config.path.display(),
            max_connections = config.max_connections,
            "SQLite pool opened"
        );

        Ok(Self::new(pool))
    }

    /// Wraps an existing pool.
    pub fn new(pool: SqlitePool) -> Self {
        let pool = Arc::new(pool);

        Self {
            audit_log: Arc::new(audit_log::Repository::new(pool.clone())),
            messages: Arc::new(messages::Repository::new(pool.clone())),
            pool,
        }
    }

    /// Returns the underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Creates the audit tables if absent and enables secure delete.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if any DDL statement fails.
    pub async fn initialize_schema(&self) -> Result<()> {
        schema::initialize(&self.pool).await
    }

    /// Appends one audit row and one message row atomically.
    ///
    /// Either both rows are committed or neither is. The transaction is
    /// rolled back when dropped on any error path.
    ///
    /// # Errors
    ///
    /// Returns `CoreError` if the transaction cannot begin, either insert
    /// fails, or the commit fails.
    #[instrument(
        name = "write_callback",
        skip_all,
        fields(message_sid = %audit.message_sid, identity_hash = %message.identity_hash)
    )]
    pub async fn write_callback(&self, audit: &AuditRecord, message: &MessageRecord) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        self.audit_log.insert_in_tx(&mut tx, audit).await?;
        self.messages.insert_in_tx(&mut tx, message).await?;

        tx.commit().await?;
        debug!("Callback records committed");

        Ok(())
    }

    /// Closes every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("SQLite pool closed");
    }
}
