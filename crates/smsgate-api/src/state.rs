//! Process-wide state shared by every request.

use std::{fmt, sync::Arc};

use smsgate_core::{Clock, RealClock, Storage};

use crate::{
    crypto::VerifierConfig,
    identity::{IdentityDeriver, IdentityError},
    Config,
};

/// Read-only state injected into the ingest handler.
///
/// Built once at startup. Clones share the pool, verifier and deriver.
#[derive(Clone)]
pub struct AppState {
    /// Audit storage.
    pub storage: Storage,
    /// Shared secret and canonical URL for signature checks.
    pub verifier: Arc<VerifierConfig>,
    /// Request identity deriver.
    pub deriver: IdentityDeriver,
    /// Source of arrival times.
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Assembles state from its parts.
    pub fn new(
        storage: Storage,
        verifier: VerifierConfig,
        deriver: IdentityDeriver,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { storage, verifier: Arc::new(verifier), deriver, clock }
    }

    /// Builds production state from configuration and an opened storage.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::InvalidParams` if the identity settings are
    /// rejected.
    pub fn from_config(config: &Config, storage: Storage) -> Result<Self, IdentityError> {
        let deriver = IdentityDeriver::new(config.to_identity_config())?;
        Ok(Self::new(storage, config.to_verifier_config(), deriver, Arc::new(RealClock::new())))
    }
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("verifier", &self.verifier)
            .field("deriver", &self.deriver)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}
