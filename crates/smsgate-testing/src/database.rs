//! Isolated SQLite databases for tests.
//!
//! Each handle owns a temporary directory holding one database file. The
//! schema is initialized through the production code path, so tests see
//! exactly the tables the service creates at startup.

use std::time::Duration;

use anyhow::{Context, Result};
use smsgate_core::{Storage, StorageConfig};
use tempfile::TempDir;
use tracing::debug;

const DATABASE_FILE: &str = "smsgate-test.db";

/// Test database handle. The directory is removed when the handle drops.
pub struct TestDatabase {
    storage: Storage,
    config: StorageConfig,
    _dir: TempDir,
}

impl TestDatabase {
    /// Creates a fresh database with the production schema.
    pub async fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("failed to create temp dir")?;

        let mut config = StorageConfig::new(dir.path().join(DATABASE_FILE));
        config.max_connections = 4;
        config.busy_timeout = Duration::from_secs(10);

        let storage = Storage::connect(&config).await.context("failed to open test database")?;
        storage.initialize_schema().await.context("failed to initialize schema")?;

        debug!(path = %config.path.display(), "created test database");

        Ok(Self { storage, config, _dir: dir })
    }

    /// Storage over this database.
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Configuration used to open this database, for reopening it.
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }
}
