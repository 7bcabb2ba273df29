//! Repository for normalized message rows.

use std::sync::Arc;

use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::{
    error::Result,
    models::{IdentityHash, MessageRecord},
};

/// Repository for `messages` operations.
pub struct Repository {
    pool: Arc<SqlitePool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    /// Appends a message row within a transaction.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails.
    pub async fn insert_in_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        record: &MessageRecord,
    ) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO messages (identity_hash, sender, receiver, body, received_on)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
        )
        .bind(record.identity_hash.as_str())
        .bind(&record.sender)
        .bind(&record.receiver)
        .bind(&record.body)
        .bind(record.received_on.as_secs())
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Counts message rows sharing an identity hash.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn count_by_identity_hash(&self, identity_hash: &IdentityHash) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE identity_hash = ?1")
            .bind(identity_hash.as_str())
            .fetch_one(&*self.pool)
            .await?;

        Ok(count)
    }

    /// Counts all message rows.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn count(&self) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM messages").fetch_one(&*self.pool).await?;

        Ok(count)
    }
}
