//! Idempotent schema creation.
//!
//! `audit_log` deliberately has no primary or unique key: a replayed
//! callback must land as a second row instead of being rejected.

use sqlx::SqlitePool;
use tracing::info;

use crate::error::Result;

const CREATE_AUDIT_LOG: &str = r"
    CREATE TABLE IF NOT EXISTS audit_log (
        received_on INTEGER NOT NULL,
        signature TEXT NOT NULL,
        idempotency_token TEXT NOT NULL,
        message_sid TEXT NOT NULL,
        account_sid TEXT NOT NULL,
        api_version TEXT NOT NULL,
        webhook_endpoint TEXT NOT NULL,
        is_authentic INTEGER NOT NULL CHECK (is_authentic IN (0, 1)),
        raw_request TEXT NOT NULL
    )
";

const CREATE_MESSAGES: &str = r"
    CREATE TABLE IF NOT EXISTS messages (
        identity_hash TEXT NOT NULL,
        sender TEXT NOT NULL,
        receiver TEXT NOT NULL,
        body TEXT NOT NULL,
        received_on INTEGER NOT NULL
    )
";

const CREATE_AUDIT_LOG_MESSAGE_SID_INDEX: &str = r"
    CREATE INDEX IF NOT EXISTS idx_audit_log_message_sid
    ON audit_log(message_sid)
";

const CREATE_MESSAGES_IDENTITY_INDEX: &str = r"
    CREATE INDEX IF NOT EXISTS idx_messages_identity_hash
    ON messages(identity_hash)
";

/// Creates tables and indexes if absent, then enables secure delete.
///
/// Safe to run on every startup.
///
/// # Errors
///
/// Returns `CoreError::Database` if any statement fails.
pub async fn initialize(pool: &SqlitePool) -> Result<()> {
    let mut tx = pool.begin().await?;

    for statement in [
        CREATE_AUDIT_LOG,
        CREATE_MESSAGES,
        CREATE_AUDIT_LOG_MESSAGE_SID_INDEX,
        CREATE_MESSAGES_IDENTITY_INDEX,
    ] {
        sqlx::query(statement).execute(&mut *tx).await?;
    }

    tx.commit().await?;

    sqlx::query("PRAGMA secure_delete = ON").execute(pool).await?;

    info!("Audit schema ready");
    Ok(())
}

/// Reports whether secure delete is active on a pooled connection.
///
/// # Errors
///
/// Returns `CoreError::Database` if the pragma cannot be read.
pub async fn secure_delete_enabled(pool: &SqlitePool) -> Result<bool> {
    let mode: i64 = sqlx::query_scalar("PRAGMA secure_delete").fetch_one(pool).await?;
    Ok(mode == 1)
}
