//! Provider callback ingestion with verification and audit persistence.
//!
//! Requests without any provider header are answered immediately and never
//! stored. Everything else is verified, given an identity, and recorded
//! whether or not the signature holds, so spoofing attempts stay visible in
//! the audit trail.

use std::collections::BTreeMap;

use axum::{
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{Html, IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde::Serialize;
use smsgate_core::{CallbackContext, GateError, InboundRequest, ReceivedAt};
use tracing::{debug, error, info, instrument, warn, Span};

use crate::{
    crypto::ValidationResult,
    form::{parse_params, raw_body_text, BodyFormat},
    AppState,
};

/// Header carrying the provider's signature.
pub const SIGNATURE_HEADER: &str = "x-twilio-signature";

/// Header carrying the provider's idempotency token.
pub const IDEMPOTENCY_HEADER: &str = "i-twilio-idempotency-token";

/// Substring that marks a header as provider-namespaced.
const PROVIDER_HEADER_MARKER: &str = "twilio";

/// Empty messaging response acknowledging an authentic callback.
pub const EMPTY_TWIML: &str = r#"<?xml version="1.0" encoding="UTF-8"?><Response/>"#;

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Caller-facing message
    pub error: String,
}

/// Ingests a provider callback.
///
/// Accepts any method on any path. Responds with:
/// - 200 and an empty messaging response when the signature is authentic
/// - 400 when it is not (the request is still recorded)
/// - 200 with a JSON error when no provider header is present (nothing is
///   recorded)
/// - 500 with an empty body when identity derivation or storage fails
#[instrument(
    name = "ingest_callback",
    skip_all,
    fields(
        method = %method,
        path = %uri.path(),
        message_sid = tracing::field::Empty,
        is_authentic = tracing::field::Empty,
    )
)]
pub async fn ingest_callback(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !has_provider_headers(&headers) {
        debug!("Request carries no provider headers");
        return error_response(&GateError::MissingProviderHeaders);
    }

    let request = inbound_request(&state, &method, &uri, &headers, &body);
    Span::current().record("message_sid", request.params.message_sid());

    match record_callback(&state, request).await {
        Ok(verdict) if verdict.is_valid => {
            Span::current().record("is_authentic", true);
            info!("Callback accepted");
            Html(EMPTY_TWIML).into_response()
        },
        Ok(verdict) => {
            Span::current().record("is_authentic", false);
            warn!(
                code = GateError::AuthenticationFailure.code(),
                reason = verdict.error_message.as_deref().unwrap_or("unknown"),
                "Callback rejected, recorded"
            );
            error_response(&GateError::AuthenticationFailure)
        },
        Err(e) => {
            error!(code = e.code(), error = %e, "Callback could not be recorded");
            error_response(&e)
        },
    }
}

/// Verifies, derives the identity, and writes both records.
///
/// Returns the verdict, with its rejection reason, once the records are
/// committed.
async fn record_callback(
    state: &AppState,
    request: InboundRequest,
) -> Result<ValidationResult, GateError> {
    let verdict = state.verifier.validate(&request.signature, &request.params);

    let identity_hash = state
        .deriver
        .derive_async(
            request.signature.clone(),
            request.idempotency_token.clone(),
            request.params.message_sid().to_string(),
        )
        .await
        .map_err(|e| GateError::IdentityDerivation(e.to_string()))?;

    let context = CallbackContext::new(request, verdict.is_valid, identity_hash);
    let (audit, message) = context.to_records().map_err(GateError::StorageWrite)?;

    state.storage.write_callback(&audit, &message).await.map_err(GateError::StorageWrite)?;

    Ok(verdict)
}

/// Whether any header name contains the provider marker, ignoring case.
pub fn has_provider_headers(headers: &HeaderMap) -> bool {
    // HeaderName is always lowercase.
    headers.keys().any(|name| name.as_str().contains(PROVIDER_HEADER_MARKER))
}

fn inbound_request(
    state: &AppState,
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: &Bytes,
) -> InboundRequest {
    let received_on = ReceivedAt::from(state.clock.now_system());
    let params = parse_params(BodyFormat::from_headers(headers), body);

    InboundRequest {
        received_on,
        method: method.to_string(),
        path: uri.path_and_query().map_or_else(|| uri.path().to_string(), ToString::to_string),
        headers: extract_headers(headers),
        signature: header_value(headers, SIGNATURE_HEADER),
        idempotency_token: header_value(headers, IDEMPOTENCY_HEADER),
        webhook_endpoint: state.verifier.webhook_url().to_string(),
        raw_body: raw_body_text(body),
        params,
    }
}

/// Header value as text, empty when absent. Non-UTF-8 bytes are replaced.
fn header_value(headers: &HeaderMap, name: &str) -> String {
    headers.get(name).map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned()).unwrap_or_default()
}

/// Flattens headers for the audit snapshot, joining repeated names.
fn extract_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut map: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes());
        match map.get_mut(name.as_str()) {
            Some(existing) => {
                existing.push_str(", ");
                existing.push_str(&value);
            },
            None => {
                map.insert(name.as_str().to_string(), value.into_owned());
            },
        }
    }
    map
}

/// Builds the caller-facing response for a request-level outcome.
fn error_response(error: &GateError) -> Response {
    let status = match error {
        GateError::AuthenticationFailure => StatusCode::BAD_REQUEST,
        GateError::MissingProviderHeaders => StatusCode::OK,
        GateError::IdentityDerivation(_)
        | GateError::StorageWrite(_)
        | GateError::SchemaInitialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    match error.client_message() {
        Some(message) => (status, Json(ErrorResponse { error: message.to_string() })).into_response(),
        None => status.into_response(),
    }
}
