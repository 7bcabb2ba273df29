//! Provider signature verification.
//!
//! The provider signs each callback with HMAC-SHA1 keyed by the account's
//! auth token. The signed data is the webhook URL followed by every body
//! parameter as `key` + `value`, sorted by key. The digest is sent base64
//! encoded in `X-Twilio-Signature`.

use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use smsgate_core::CallbackParams;
use subtle::ConstantTimeEq;

type HmacSha1 = Hmac<Sha1>;

/// Length of a base64 encoded SHA-1 digest, padding included.
const ENCODED_SIGNATURE_LEN: usize = 28;

/// Result of signature validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    /// Whether the signature is valid.
    pub is_valid: bool,
    /// Error message if validation failed.
    pub error_message: Option<String>,
}

impl ValidationResult {
    /// Creates a successful validation result.
    pub fn valid() -> Self {
        Self { is_valid: true, error_message: None }
    }

    /// Creates a failed validation result with error message.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self { is_valid: false, error_message: Some(message.into()) }
    }
}

/// Signature validation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    /// Missing signature header.
    MissingSignature,
    /// Claimed signature is not a base64 SHA-1 digest.
    InvalidFormat(String),
    /// Signature verification failed.
    VerificationFailed,
    /// Auth token is empty.
    InvalidSecret,
}

impl fmt::Display for SignatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingSignature => write!(f, "signature header is empty"),
            Self::InvalidFormat(reason) => write!(f, "invalid signature format: {reason}"),
            Self::VerificationFailed => write!(f, "signature mismatch"),
            Self::InvalidSecret => write!(f, "auth token is empty"),
        }
    }
}

impl std::error::Error for SignatureError {}

/// Shared secret and canonical URL the verifier checks against.
#[derive(Clone)]
pub struct VerifierConfig {
    auth_token: String,
    webhook_url: String,
}

impl VerifierConfig {
    /// Creates a verifier configuration.
    pub fn new(auth_token: impl Into<String>, webhook_url: impl Into<String>) -> Self {
        Self { auth_token: auth_token.into(), webhook_url: webhook_url.into() }
    }

    /// Canonical URL the provider signs.
    pub fn webhook_url(&self) -> &str {
        &self.webhook_url
    }

    /// Validates a claimed signature for `params`.
    pub fn validate(&self, signature: &str, params: &CallbackParams) -> ValidationResult {
        validate_signature(&self.auth_token, signature, &self.webhook_url, params)
    }
}

impl fmt::Debug for VerifierConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifierConfig")
            .field("auth_token", &"***")
            .field("webhook_url", &self.webhook_url)
            .finish()
    }
}

/// Validates a provider signature.
///
/// Recomputes the expected signature from the auth token, URL and
/// parameters, then compares it to the claimed one in constant time. Never
/// panics: empty or malformed input yields an invalid result.
///
/// # Example
///
/// ```
/// use smsgate_api::crypto::{compute_signature, validate_signature};
/// use smsgate_core::CallbackParams;
///
/// let params = CallbackParams::new([("MessageSid", "SM123"), ("Body", "hi")]);
/// let url = "https://example.com/sms";
/// let signature = compute_signature("secret", url, &params).unwrap();
///
/// let result = validate_signature("secret", &signature, url, &params);
/// assert!(result.is_valid);
/// ```
pub fn validate_signature(
    auth_token: &str,
    signature: &str,
    url: &str,
    params: &CallbackParams,
) -> ValidationResult {
    if signature.is_empty() {
        return ValidationResult::invalid(SignatureError::MissingSignature.to_string());
    }

    if let Err(err) = check_signature_format(signature) {
        return ValidationResult::invalid(err.to_string());
    }

    let expected = match compute_signature(auth_token, url, params) {
        Ok(sig) => sig,
        Err(err) => return ValidationResult::invalid(err.to_string()),
    };

    if constant_time_eq(expected.as_bytes(), signature.as_bytes()) {
        ValidationResult::valid()
    } else {
        ValidationResult::invalid(SignatureError::VerificationFailed.to_string())
    }
}

/// Boolean projection of [`validate_signature`].
pub fn verify(auth_token: &str, signature: &str, url: &str, params: &CallbackParams) -> bool {
    validate_signature(auth_token, signature, url, params).is_valid
}

/// Computes the base64 signature the provider would send.
///
/// # Errors
///
/// Returns `SignatureError::InvalidSecret` if the auth token is empty.
pub fn compute_signature(
    auth_token: &str,
    url: &str,
    params: &CallbackParams,
) -> Result<String, SignatureError> {
    if auth_token.is_empty() {
        return Err(SignatureError::InvalidSecret);
    }

    let mut mac =
        HmacSha1::new_from_slice(auth_token.as_bytes()).map_err(|_| SignatureError::InvalidSecret)?;

    mac.update(url.as_bytes());
    for (key, value) in params.sorted_pairs() {
        mac.update(key.as_bytes());
        mac.update(value.as_bytes());
    }

    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Rejects values that cannot be a base64 SHA-1 digest before hashing.
fn check_signature_format(signature: &str) -> Result<(), SignatureError> {
    if signature.len() != ENCODED_SIGNATURE_LEN {
        return Err(SignatureError::InvalidFormat(format!(
            "expected {ENCODED_SIGNATURE_LEN} characters, got {}",
            signature.len()
        )));
    }

    match STANDARD.decode(signature) {
        Ok(bytes) if bytes.len() == 20 => Ok(()),
        Ok(bytes) => Err(SignatureError::InvalidFormat(format!(
            "expected 20 digest bytes, got {}",
            bytes.len()
        ))),
        Err(err) => Err(SignatureError::InvalidFormat(err.to_string())),
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}
