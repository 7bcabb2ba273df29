//! Callback body parsing.
//!
//! The provider posts `application/x-www-form-urlencoded` bodies. JSON
//! objects are accepted too, with non-string scalars kept in their JSON
//! text form. A body that cannot be parsed becomes an empty parameter set
//! and is still verified and recorded.

use axum::http::{header::CONTENT_TYPE, HeaderMap};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::Value;
use smsgate_core::CallbackParams;
use tracing::debug;

/// Body encodings the ingest handler understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFormat {
    /// `application/x-www-form-urlencoded`, also the fallback.
    Form,
    /// `application/json`.
    Json,
}

impl BodyFormat {
    /// Picks the format from the request's `Content-Type`.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.starts_with("application/json") {
            Self::Json
        } else {
            Self::Form
        }
    }
}

/// Parses a callback body into ordered parameters.
pub fn parse_params(format: BodyFormat, body: &[u8]) -> CallbackParams {
    if body.is_empty() {
        return CallbackParams::default();
    }

    match format {
        BodyFormat::Form => parse_form(body),
        BodyFormat::Json => parse_json(body),
    }
}

/// Prefix marking a body that was stored base64-encoded.
pub const BASE64_BODY_PREFIX: &str = "base64:";

/// Renders the received body for the audit snapshot.
///
/// UTF-8 bodies are kept verbatim. Anything else is base64-encoded behind
/// [`BASE64_BODY_PREFIX`] so no byte is lost.
pub fn raw_body_text(body: &[u8]) -> String {
    match std::str::from_utf8(body) {
        Ok(text) => text.to_string(),
        Err(_) => format!("{BASE64_BODY_PREFIX}{}", STANDARD.encode(body)),
    }
}

fn parse_form(body: &[u8]) -> CallbackParams {
    match serde_urlencoded::from_bytes::<Vec<(String, String)>>(body) {
        Ok(pairs) => CallbackParams::new(pairs),
        Err(e) => {
            debug!(error = %e, "Unparseable form body recorded as empty");
            CallbackParams::default()
        },
    }
}

fn parse_json(body: &[u8]) -> CallbackParams {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => map
            .into_iter()
            .filter_map(|(key, value)| match value {
                Value::String(s) => Some((key, s)),
                Value::Null | Value::Array(_) | Value::Object(_) => None,
                scalar => Some((key, scalar.to_string())),
            })
            .collect(),
        Ok(_) => {
            debug!("JSON body is not an object, recorded as empty");
            CallbackParams::default()
        },
        Err(e) => {
            debug!(error = %e, "Unparseable JSON body recorded as empty");
            CallbackParams::default()
        },
    }
}
