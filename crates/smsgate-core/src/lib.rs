//! Core domain models, error taxonomy and audit storage.
//!
//! Provides the immutable callback context, the audit and normalized message
//! records derived from it, and the SQLite-backed writer that persists both
//! records in a single transaction. The HTTP crate depends on these types for
//! everything it stores.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod storage;
pub mod time;

pub use error::{CoreError, GateError, Result};
pub use models::{
    AuditRecord, CallbackContext, CallbackParams, IdentityHash, InboundRequest, MessageRecord,
    ReceivedAt, StoredFlag,
};
pub use storage::{Storage, StorageConfig};
pub use time::{Clock, RealClock, TestClock};
