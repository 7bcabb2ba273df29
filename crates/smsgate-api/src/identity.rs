//! Request identity derivation.
//!
//! Every callback gets a memory-hard, deterministic identity computed from
//! its claimed signature, idempotency token and message identifier. The
//! identity joins an audit row to its message row and lets downstream
//! tooling group replays. It is never enforced as unique.

use std::{num::NonZeroUsize, sync::Arc, thread};

use argon2::{Algorithm, Argon2, Params, Version};
use smsgate_core::IdentityHash;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::debug;

/// Separator between the hashed inputs (ASCII unit separator).
const FIELD_SEPARATOR: &str = "\u{1f}";

/// Shortest salt Argon2 accepts.
pub const MIN_SALT_LEN: usize = 8;

/// Errors raised while deriving an identity.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// Cost parameters or salt rejected by Argon2.
    #[error("invalid identity parameters: {0}")]
    InvalidParams(String),

    /// Argon2 failed while hashing.
    #[error("identity hashing failed: {0}")]
    Hashing(String),

    /// The blocking hash task panicked or was cancelled.
    #[error("identity task failed: {0}")]
    TaskFailed(String),

    /// No derivation slot could be acquired.
    #[error("identity derivation unavailable: {0}")]
    Unavailable(String),
}

/// Argon2id cost parameters and salt for identity derivation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityConfig {
    /// Memory cost in KiB (default: 19456 = 19 MiB)
    pub memory_cost_kib: u32,
    /// Time cost / iterations (default: 2)
    pub time_cost: u32,
    /// Parallelism (default: 1)
    pub parallelism: u32,
    /// Digest length in bytes (default: 32)
    pub output_len: usize,
    /// Fixed application salt
    pub salt: String,
    /// Derivations allowed to hold their memory cost at once (default:
    /// available CPU parallelism)
    pub max_concurrent: usize,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            memory_cost_kib: 19 * 1024,
            time_cost: 2,
            parallelism: 1,
            output_len: 32,
            salt: "smsgate-identity-v1".to_string(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

/// One slot per available CPU; four when the count is unknown.
fn default_max_concurrent() -> usize {
    thread::available_parallelism().map_or(4, NonZeroUsize::get)
}

impl IdentityConfig {
    /// Cheap settings for tests and benchmarks. Never use in production.
    pub fn fast() -> Self {
        Self { memory_cost_kib: 64, time_cost: 1, ..Self::default() }
    }

    /// Builds the Argon2 parameters, rejecting anything Argon2 would.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::InvalidParams` for out-of-range costs, output
    /// length, a salt shorter than [`MIN_SALT_LEN`], or zero concurrency.
    pub fn params(&self) -> Result<Params, IdentityError> {
        if self.max_concurrent == 0 {
            return Err(IdentityError::InvalidParams(
                "max_concurrent must be at least 1".to_string(),
            ));
        }

        if self.salt.len() < MIN_SALT_LEN {
            return Err(IdentityError::InvalidParams(format!(
                "salt must be at least {MIN_SALT_LEN} bytes, got {}",
                self.salt.len()
            )));
        }

        Params::new(self.memory_cost_kib, self.time_cost, self.parallelism, Some(self.output_len))
            .map_err(|e| IdentityError::InvalidParams(e.to_string()))
    }
}

/// Derives request identities with Argon2id.
///
/// Cheap to clone; clones share the configuration and the concurrency
/// limit, so at most `max_concurrent` hashes hold their memory at once.
#[derive(Debug, Clone)]
pub struct IdentityDeriver {
    config: Arc<IdentityConfig>,
    params: Params,
    permits: Arc<Semaphore>,
}

impl IdentityDeriver {
    /// Creates a deriver, validating the parameters once.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::InvalidParams` if Argon2 rejects the
    /// configuration.
    pub fn new(config: IdentityConfig) -> Result<Self, IdentityError> {
        let params = config.params()?;
        let permits = Arc::new(Semaphore::new(config.max_concurrent));
        Ok(Self { config: Arc::new(config), params, permits })
    }

    /// Computes the identity hash on the current thread.
    ///
    /// Deterministic for a given configuration and inputs. Blocks for the
    /// full Argon2 cost; async callers should use
    /// [`IdentityDeriver::derive_async`].
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::Hashing` if Argon2 fails, for example when
    /// the memory cost cannot be allocated.
    pub fn derive(
        &self,
        signature: &str,
        idempotency_token: &str,
        message_sid: &str,
    ) -> Result<IdentityHash, IdentityError> {
        let input = [signature, idempotency_token, message_sid].join(FIELD_SEPARATOR);

        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone());
        let mut output = vec![0u8; self.config.output_len];
        argon2
            .hash_password_into(input.as_bytes(), self.config.salt.as_bytes(), &mut output)
            .map_err(|e| IdentityError::Hashing(e.to_string()))?;

        Ok(IdentityHash(hex::encode(output)))
    }

    /// Computes the identity hash on the blocking thread pool.
    ///
    /// Waits for a derivation slot first. The slot is held until the hash
    /// finishes, even if the caller is dropped.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`IdentityDeriver::derive`],
    /// `IdentityError::Unavailable` if no slot can be acquired, or
    /// `IdentityError::TaskFailed` if the blocking task does not complete.
    pub async fn derive_async(
        &self,
        signature: String,
        idempotency_token: String,
        message_sid: String,
    ) -> Result<IdentityHash, IdentityError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|e| IdentityError::Unavailable(e.to_string()))?;

        let deriver = self.clone();
        let identity = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            deriver.derive(&signature, &idempotency_token, &message_sid)
        })
        .await
        .map_err(|e| IdentityError::TaskFailed(e.to_string()))??;

        debug!(identity_hash = %identity, "Request identity derived");
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deriver() -> IdentityDeriver {
        IdentityDeriver::new(IdentityConfig::fast()).unwrap()
    }

    #[test]
    fn derive_is_deterministic() {
        let deriver = deriver();
        let first = deriver.derive("sig", "tok", "SM123").unwrap();
        let second = deriver.derive("sig", "tok", "SM123").unwrap();

        assert_eq!(first, second);
        assert_eq!(first.as_str().len(), 64);
        assert!(first.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn every_input_changes_identity() {
        let deriver = deriver();
        let base = deriver.derive("sig", "tok", "SM123").unwrap();

        assert_ne!(base, deriver.derive("sig2", "tok", "SM123").unwrap());
        assert_ne!(base, deriver.derive("sig", "tok2", "SM123").unwrap());
        assert_ne!(base, deriver.derive("sig", "tok", "SM124").unwrap());
    }

    #[test]
    fn separator_prevents_boundary_shifts() {
        let deriver = deriver();
        assert_ne!(
            deriver.derive("ab", "c", "SM1").unwrap(),
            deriver.derive("a", "bc", "SM1").unwrap()
        );
    }

    #[test]
    fn salt_changes_identity() {
        let a = deriver();
        let b = IdentityDeriver::new(IdentityConfig {
            salt: "another-salt".to_string(),
            ..IdentityConfig::fast()
        })
        .unwrap();

        assert_ne!(a.derive("s", "t", "m").unwrap(), b.derive("s", "t", "m").unwrap());
    }

    #[test]
    fn empty_inputs_still_derive() {
        let identity = deriver().derive("", "", "").unwrap();
        assert_eq!(identity.as_str().len(), 64);
    }

    #[test]
    fn output_len_controls_digest_size() {
        let deriver =
            IdentityDeriver::new(IdentityConfig { output_len: 16, ..IdentityConfig::fast() })
                .unwrap();
        assert_eq!(deriver.derive("s", "t", "m").unwrap().as_str().len(), 32);
    }

    #[test]
    fn short_salt_is_rejected() {
        let result =
            IdentityDeriver::new(IdentityConfig { salt: "short".to_string(), ..IdentityConfig::fast() });
        assert!(matches!(result, Err(IdentityError::InvalidParams(_))));
    }

    #[test]
    fn zero_time_cost_is_rejected() {
        let result = IdentityDeriver::new(IdentityConfig { time_cost: 0, ..IdentityConfig::fast() });
        assert!(matches!(result, Err(IdentityError::InvalidParams(_))));
    }

    #[test]
    fn default_config_is_valid() {
        assert!(IdentityConfig::default().params().is_ok());
    }

    #[tokio::test]
    async fn derive_async_matches_blocking_derive() {
        let deriver = deriver();
        let blocking = deriver.derive("sig", "tok", "SM123").unwrap();
        let offloaded = deriver
            .derive_async("sig".to_string(), "tok".to_string(), "SM123".to_string())
            .await
            .unwrap();

        assert_eq!(blocking, offloaded);
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let result =
            IdentityDeriver::new(IdentityConfig { max_concurrent: 0, ..IdentityConfig::fast() });
        assert!(matches!(result, Err(IdentityError::InvalidParams(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn derivations_beyond_the_limit_wait_for_a_slot() {
        let deriver =
            IdentityDeriver::new(IdentityConfig { max_concurrent: 2, ..IdentityConfig::fast() })
                .unwrap();
        let expected = deriver.derive("sig", "tok", "SM123").unwrap();

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let deriver = deriver.clone();
                tokio::spawn(async move {
                    deriver
                        .derive_async("sig".to_string(), "tok".to_string(), "SM123".to_string())
                        .await
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), expected);
        }
        assert_eq!(deriver.permits.available_permits(), 2);
    }

    #[tokio::test]
    async fn closed_limiter_fails_the_request_only() {
        let deriver = deriver();
        deriver.permits.close();

        let result =
            deriver.derive_async("sig".to_string(), "tok".to_string(), "SM123".to_string()).await;

        assert!(matches!(result, Err(IdentityError::Unavailable(_))));
        assert!(deriver.derive("sig", "tok", "SM123").is_ok());
    }
}
