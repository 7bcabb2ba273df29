//! smsgate HTTP API.
//!
//! Verifies provider callbacks, derives their identity, and hands the
//! decided request to core storage.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod crypto;
pub mod form;
pub mod handlers;
pub mod identity;
pub mod server;
pub mod state;

pub use config::Config;
pub use crypto::{validate_signature, verify, ValidationResult, VerifierConfig};
pub use identity::{IdentityConfig, IdentityDeriver, IdentityError};
pub use server::{create_router, serve, shutdown_signal, start_server};
pub use state::AppState;
