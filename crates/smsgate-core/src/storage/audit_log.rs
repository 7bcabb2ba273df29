//! Repository for forensic audit rows.

use std::sync::Arc;

use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::{
    error::Result,
    models::{AuditRecord, StoredFlag},
};

/// Repository for `audit_log` operations.
pub struct Repository {
    pool: Arc<SqlitePool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    /// Appends an audit row within a transaction.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails.
    pub async fn insert_in_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        record: &AuditRecord,
    ) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO audit_log (
                received_on, signature, idempotency_token, message_sid, account_sid,
                api_version, webhook_endpoint, is_authentic, raw_request
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ",
        )
        .bind(record.received_on.as_secs())
        .bind(&record.signature)
        .bind(&record.idempotency_token)
        .bind(&record.message_sid)
        .bind(&record.account_sid)
        .bind(&record.api_version)
        .bind(&record.webhook_endpoint)
        .bind(StoredFlag::from(record.is_authentic))
        .bind(&record.raw_request)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Counts audit rows recorded for a provider message identifier.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn count_by_message_sid(&self, message_sid: &str) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM audit_log WHERE message_sid = ?1")
            .bind(message_sid)
            .fetch_one(&*self.pool)
            .await?;

        Ok(count)
    }

    /// Counts all audit rows.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn count(&self) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM audit_log").fetch_one(&*self.pool).await?;

        Ok(count)
    }
}
