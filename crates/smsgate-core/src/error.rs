//! Error types and result handling for callback ingestion.
//!
//! Defines the storage-layer error and the request-level taxonomy with
//! stable codes. Only authentication failures and missing provider headers
//! ever reach the HTTP caller as text; every other variant is reported to
//! the operator through logging.

use thiserror::Error;

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Storage-layer error type.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// Raw request snapshot could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Constraint violation.
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// A stored column held a value outside its documented domain.
    #[error("Invalid stored value: {0}")]
    InvalidStoredValue(String),
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Self::ConstraintViolation(format!("unique constraint violation: {db_err}"))
            },
            sqlx::Error::Database(db_err) if db_err.is_check_violation() => {
                Self::ConstraintViolation(format!("check constraint violation: {db_err}"))
            },
            _ => Self::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Request-level error taxonomy.
#[derive(Debug, Error)]
pub enum GateError {
    // Expected outcomes (E1001-E1002)
    /// Claimed signature does not match the recomputed one (E1001).
    #[error("[E1001] Authentication failure: signature mismatch")]
    AuthenticationFailure,

    /// Request carries no provider-namespaced header (E1002).
    #[error("[E1002] Missing provider headers")]
    MissingProviderHeaders,

    // Exceptional outcomes (E3001-E3003)
    /// Memory-hard identity hash could not be computed (E3001).
    #[error("[E3001] Identity derivation failed: {0}")]
    IdentityDerivation(String),

    /// Audit transaction could not be committed (E3002).
    #[error("[E3002] Storage write failed: {0}")]
    StorageWrite(#[source] CoreError),

    /// Audit tables could not be created at startup (E3003).
    #[error("[E3003] Schema initialization failed: {0}")]
    SchemaInitialization(#[source] CoreError),
}

impl GateError {
    /// Returns the error code (E1001-E3003).
    pub const fn code(&self) -> &'static str {
        match self {
            Self::AuthenticationFailure => "E1001",
            Self::MissingProviderHeaders => "E1002",
            Self::IdentityDerivation(_) => "E3001",
            Self::StorageWrite(_) => "E3002",
            Self::SchemaInitialization(_) => "E3003",
        }
    }

    /// Returns the only text the HTTP caller is allowed to see.
    ///
    /// Internal failures return `None`: the caller gets a bare failure
    /// status and never an internal detail.
    pub const fn client_message(&self) -> Option<&'static str> {
        match self {
            Self::AuthenticationFailure => Some("Invalid Twilio request found."),
            Self::MissingProviderHeaders => Some("Not Authenticated."),
            Self::IdentityDerivation(_) | Self::StorageWrite(_) | Self::SchemaInitialization(_) => {
                None
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(GateError::AuthenticationFailure.code(), "E1001");
        assert_eq!(GateError::MissingProviderHeaders.code(), "E1002");
        assert_eq!(GateError::IdentityDerivation("oom".into()).code(), "E3001");
        assert_eq!(
            GateError::StorageWrite(CoreError::Database("disk full".into())).code(),
            "E3002"
        );
        assert_eq!(
            GateError::SchemaInitialization(CoreError::Database("locked".into())).code(),
            "E3003"
        );
    }

    #[test]
    fn client_messages_never_leak_internal_detail() {
        assert_eq!(
            GateError::AuthenticationFailure.client_message(),
            Some("Invalid Twilio request found.")
        );
        assert_eq!(GateError::MissingProviderHeaders.client_message(), Some("Not Authenticated."));

        let storage = GateError::StorageWrite(CoreError::Database("/var/db/smsgate.db".into()));
        assert!(storage.client_message().is_none());
        assert!(GateError::IdentityDerivation("params".into()).client_message().is_none());
    }

    #[test]
    fn serde_errors_map_to_serialization() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(matches!(CoreError::from(err), CoreError::Serialization(_)));
    }
}
