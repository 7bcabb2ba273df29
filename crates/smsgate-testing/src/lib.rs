//! Test infrastructure for deterministic callback ingestion tests.
//!
//! Provides a throwaway SQLite database per test, a controllable clock,
//! fixtures that sign callbacks the way the provider does, and checks for
//! the dual-write invariants.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

use std::{
    sync::Arc,
    time::{Duration, UNIX_EPOCH},
};

use anyhow::{Context, Result};
use smsgate_core::StoredFlag;
use sqlx::SqlitePool;

pub mod database;
pub mod fixtures;
pub mod invariants;

pub use database::TestDatabase;
pub use fixtures::{CallbackBuilder, TestCallback, TEST_AUTH_TOKEN, TEST_WEBHOOK_URL};
pub use invariants::Invariants;
pub use smsgate_core::{Clock, Storage, TestClock};

/// Fixed arrival time used by every `TestEnv` clock.
pub const TEST_EPOCH_SECS: u64 = 1_700_000_000;

/// Test environment backed by an isolated database file.
///
/// The database lives in a temporary directory removed on drop, so tests
/// never share rows.
pub struct TestEnv {
    /// Deterministic clock, starting at [`TEST_EPOCH_SECS`]
    pub clock: TestClock,
    /// Database handle for this test environment
    database: TestDatabase,
}

/// Audit row as read back from SQLite.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AuditRow {
    /// Arrival time in unix seconds
    pub received_on: i64,
    /// Claimed signature
    pub signature: String,
    /// Idempotency token
    pub idempotency_token: String,
    /// Provider message identifier
    pub message_sid: String,
    /// Provider account identifier
    pub account_sid: String,
    /// Provider API version
    pub api_version: String,
    /// Canonical webhook URL
    pub webhook_endpoint: String,
    /// Verdict as stored
    pub is_authentic: StoredFlag,
    /// JSON request snapshot
    pub raw_request: String,
}

impl AuditRow {
    /// Parses the stored request snapshot.
    pub fn raw_request_json(&self) -> Result<serde_json::Value> {
        serde_json::from_str(&self.raw_request).context("raw_request is not valid JSON")
    }
}

/// Message row as read back from SQLite.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MessageRow {
    /// Join key against the audit row
    pub identity_hash: String,
    /// Originating address
    pub sender: String,
    /// Destination address
    pub receiver: String,
    /// Message text
    pub body: String,
    /// Arrival time in unix seconds
    pub received_on: i64,
}

impl TestEnv {
    /// Creates a test environment with a fresh, initialized database.
    pub async fn new() -> Result<Self> {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("error")),
            )
            .with_test_writer()
            .try_init();

        let database = TestDatabase::new().await.context("failed to create test database")?;
        let clock = TestClock::with_start_time(UNIX_EPOCH + Duration::from_secs(TEST_EPOCH_SECS));

        Ok(Self { clock, database })
    }

    /// Storage handle over the test database.
    pub fn storage(&self) -> &Storage {
        self.database.storage()
    }

    /// The isolated database backing this environment.
    pub fn database(&self) -> &TestDatabase {
        &self.database
    }

    /// Underlying pool, for ad-hoc assertions.
    pub fn pool(&self) -> &SqlitePool {
        self.database.storage().pool()
    }

    /// The test clock as a shareable trait object.
    pub fn clock_arc(&self) -> Arc<dyn Clock> {
        Arc::new(self.clock.clone())
    }

    /// All audit rows in insertion order.
    pub async fn audit_rows(&self) -> Result<Vec<AuditRow>> {
        sqlx::query_as::<_, AuditRow>(
            r"
            SELECT received_on, signature, idempotency_token, message_sid, account_sid,
                   api_version, webhook_endpoint, is_authentic, raw_request
            FROM audit_log
            ORDER BY rowid
            ",
        )
        .fetch_all(self.pool())
        .await
        .context("failed to read audit_log")
    }

    /// All message rows in insertion order.
    pub async fn message_rows(&self) -> Result<Vec<MessageRow>> {
        sqlx::query_as::<_, MessageRow>(
            r"
            SELECT identity_hash, sender, receiver, body, received_on
            FROM messages
            ORDER BY rowid
            ",
        )
        .fetch_all(self.pool())
        .await
        .context("failed to read messages")
    }

    /// Number of audit rows.
    pub async fn audit_count(&self) -> Result<i64> {
        self.storage().audit_log.count().await.context("failed to count audit rows")
    }

    /// Number of message rows.
    pub async fn message_count(&self) -> Result<i64> {
        self.storage().messages.count().await.context("failed to count message rows")
    }

    /// Makes every subsequent insert into `messages` fail.
    ///
    /// Used to prove that a failed second insert rolls back the first.
    pub async fn fail_message_inserts(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TRIGGER IF NOT EXISTS fail_message_inserts
            BEFORE INSERT ON messages
            BEGIN
                SELECT RAISE(ABORT, 'forced message insert failure');
            END
            ",
        )
        .execute(self.pool())
        .await
        .context("failed to install failing trigger")?;

        Ok(())
    }
}
