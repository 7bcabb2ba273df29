//! Core domain models for callback ingestion.
//!
//! Defines the inbound request snapshot, the decided callback context, and
//! the two records persisted for every accepted request. Includes the
//! explicit conversions used at the storage boundary.

use std::{
    collections::BTreeMap,
    fmt,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};
use sqlx::{encode::IsNull, error::BoxDynError, Database, Decode, Encode, Sqlite, Type};

use crate::error::{CoreError, Result};

/// Body field carrying the provider's message identifier.
pub const FIELD_MESSAGE_SID: &str = "MessageSid";
/// Legacy body field carrying the message identifier on SMS callbacks.
pub const FIELD_SMS_MESSAGE_SID: &str = "SmsMessageSid";
/// Body field carrying the provider's account identifier.
pub const FIELD_ACCOUNT_SID: &str = "AccountSid";
/// Body field carrying the provider API version.
pub const FIELD_API_VERSION: &str = "ApiVersion";
/// Body field carrying the originating address.
pub const FIELD_FROM: &str = "From";
/// Body field carrying the destination address.
pub const FIELD_TO: &str = "To";
/// Body field carrying the message text.
pub const FIELD_BODY: &str = "Body";

/// Arrival time recorded by this service, in whole unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReceivedAt(pub i64);

impl ReceivedAt {
    /// Returns the timestamp as unix seconds.
    pub const fn as_secs(self) -> i64 {
        self.0
    }
}

impl From<SystemTime> for ReceivedAt {
    fn from(time: SystemTime) -> Self {
        let secs = time.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or_default();
        Self(i64::try_from(secs).unwrap_or(i64::MAX))
    }
}

impl fmt::Display for ReceivedAt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Boolean as persisted in SQLite: `1` for true, `0` for false.
///
/// Reading back rejects every other integer instead of treating non-zero
/// as true.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StoredFlag(i64);

impl StoredFlag {
    /// Returns the stored integer.
    pub const fn as_i64(self) -> i64 {
        self.0
    }

    /// Returns the boolean this flag encodes.
    pub const fn as_bool(self) -> bool {
        self.0 == 1
    }

    /// Validates a stored integer.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidStoredValue` for anything but 0 or 1.
    pub fn try_from_i64(value: i64) -> Result<Self> {
        match value {
            0 | 1 => Ok(Self(value)),
            other => Err(CoreError::InvalidStoredValue(format!(
                "expected boolean flag 0 or 1, got {other}"
            ))),
        }
    }
}

impl From<bool> for StoredFlag {
    fn from(value: bool) -> Self {
        if value {
            Self(1)
        } else {
            Self(0)
        }
    }
}

impl From<StoredFlag> for bool {
    fn from(flag: StoredFlag) -> Self {
        flag.as_bool()
    }
}

impl Type<Sqlite> for StoredFlag {
    fn type_info() -> <Sqlite as Database>::TypeInfo {
        <i64 as Type<Sqlite>>::type_info()
    }
}

impl<'q> Encode<'q, Sqlite> for StoredFlag {
    fn encode_by_ref(
        &self,
        buf: &mut <Sqlite as Database>::ArgumentBuffer<'q>,
    ) -> std::result::Result<IsNull, BoxDynError> {
        <i64 as Encode<'q, Sqlite>>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> Decode<'r, Sqlite> for StoredFlag {
    fn decode(value: <Sqlite as Database>::ValueRef<'r>) -> std::result::Result<Self, BoxDynError> {
        let raw = <i64 as Decode<'r, Sqlite>>::decode(value)?;
        Ok(Self::try_from_i64(raw)?)
    }
}

/// Output of the request identity deriver, lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityHash(pub String);

impl IdentityHash {
    /// Returns the hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Structured callback body as ordered key/value pairs.
///
/// Keeps repeated keys, which the provider's signature scheme covers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackParams(Vec<(String, String)>);

impl CallbackParams {
    /// Creates a parameter set from key/value pairs, preserving order.
    pub fn new<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    /// Returns the first value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// Returns pairs in signing order: by key, then by value.
    pub fn sorted_pairs(&self) -> Vec<(&str, &str)> {
        let mut pairs: Vec<(&str, &str)> =
            self.0.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        pairs.sort_unstable();
        pairs
    }

    /// Returns the pairs in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of pairs.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the body carried no parameters.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Provider message identifier, empty when absent.
    pub fn message_sid(&self) -> &str {
        self.get(FIELD_MESSAGE_SID).or_else(|| self.get(FIELD_SMS_MESSAGE_SID)).unwrap_or_default()
    }

    /// Provider account identifier, empty when absent.
    pub fn account_sid(&self) -> &str {
        self.get(FIELD_ACCOUNT_SID).unwrap_or_default()
    }

    /// Provider API version, empty when absent.
    pub fn api_version(&self) -> &str {
        self.get(FIELD_API_VERSION).unwrap_or_default()
    }

    /// Originating address, empty when absent.
    pub fn sender(&self) -> &str {
        self.get(FIELD_FROM).unwrap_or_default()
    }

    /// Destination address, empty when absent.
    pub fn receiver(&self) -> &str {
        self.get(FIELD_TO).unwrap_or_default()
    }

    /// Message text, empty when absent.
    pub fn body(&self) -> &str {
        self.get(FIELD_BODY).unwrap_or_default()
    }
}

impl<K, V> FromIterator<(K, V)> for CallbackParams
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::new(iter)
    }
}

/// Everything known about an inbound provider callback before it is
/// decided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundRequest {
    /// Arrival time recorded by this service.
    pub received_on: ReceivedAt,
    /// HTTP method.
    pub method: String,
    /// Request path and query.
    pub path: String,
    /// Request headers, lowercase names.
    pub headers: BTreeMap<String, String>,
    /// Claimed signature header value, verbatim.
    pub signature: String,
    /// Provider idempotency header value, verbatim.
    pub idempotency_token: String,
    /// Canonical URL this service believes it was invoked at.
    pub webhook_endpoint: String,
    /// Body exactly as received: UTF-8 text, or `base64:` followed by the
    /// standard encoding when the bytes are not UTF-8.
    pub raw_body: String,
    /// Parsed body.
    pub params: CallbackParams,
}

/// Decided callback: the inbound request plus its verdict and identity.
///
/// Constructed once every input is known and never mutated afterwards. The
/// storage writer only ever sees records produced from a complete context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackContext {
    #[serde(flatten)]
    request: InboundRequest,
    is_authentic: bool,
    identity_hash: IdentityHash,
}

impl CallbackContext {
    /// Decides an inbound request.
    pub fn new(request: InboundRequest, is_authentic: bool, identity_hash: IdentityHash) -> Self {
        Self { request, is_authentic, identity_hash }
    }

    /// Builds the audit and normalized message records.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Serialization` if the raw request snapshot cannot
    /// be encoded.
    pub fn to_records(&self) -> Result<(AuditRecord, MessageRecord)> {
        let raw_request = serde_json::to_string(self)?;
        let params = &self.request.params;

        let audit = AuditRecord {
            received_on: self.request.received_on,
            signature: self.request.signature.clone(),
            idempotency_token: self.request.idempotency_token.clone(),
            message_sid: params.message_sid().to_string(),
            account_sid: params.account_sid().to_string(),
            api_version: params.api_version().to_string(),
            webhook_endpoint: self.request.webhook_endpoint.clone(),
            is_authentic: self.is_authentic,
            raw_request,
        };

        let message = MessageRecord {
            identity_hash: self.identity_hash.clone(),
            sender: params.sender().to_string(),
            receiver: params.receiver().to_string(),
            body: params.body().to_string(),
            received_on: self.request.received_on,
        };

        Ok((audit, message))
    }
}

/// Append-only forensic record of one callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    /// Arrival time recorded by this service.
    pub received_on: ReceivedAt,
    /// Claimed signature, verbatim.
    pub signature: String,
    /// Provider idempotency token, verbatim.
    pub idempotency_token: String,
    /// Provider message identifier.
    pub message_sid: String,
    /// Provider account identifier.
    pub account_sid: String,
    /// Provider API version.
    pub api_version: String,
    /// Canonical webhook URL used for verification.
    pub webhook_endpoint: String,
    /// Verifier verdict.
    pub is_authentic: bool,
    /// JSON snapshot of the whole callback context.
    pub raw_request: String,
}

/// Normalized message extracted from one callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    /// Join key against the audit record.
    pub identity_hash: IdentityHash,
    /// Originating address.
    pub sender: String,
    /// Destination address.
    pub receiver: String,
    /// Message text.
    pub body: String,
    /// Same arrival time as the paired audit record.
    pub received_on: ReceivedAt,
}
