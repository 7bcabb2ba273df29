//! Integration tests for the callback ingestion endpoint.
//!
//! Drives the router with `oneshot` against a temporary SQLite database and
//! checks both the HTTP response and the rows left behind.

use std::time::Duration;

use axum::{
    body::Body,
    http::{header::CONTENT_TYPE, Request, StatusCode},
    Router,
};
use smsgate_api::{
    create_router, handlers::ingest::EMPTY_TWIML, AppState, IdentityConfig, IdentityDeriver,
    VerifierConfig,
};
use smsgate_testing::{
    CallbackBuilder, Invariants, TestCallback, TestEnv, TEST_AUTH_TOKEN, TEST_EPOCH_SECS,
    TEST_WEBHOOK_URL,
};
use tower::ServiceExt;

fn deriver() -> IdentityDeriver {
    IdentityDeriver::new(IdentityConfig::fast()).expect("fast identity config")
}

fn app(env: &TestEnv) -> Router {
    let state = AppState::new(
        env.storage().clone(),
        VerifierConfig::new(TEST_AUTH_TOKEN, TEST_WEBHOOK_URL),
        deriver(),
        env.clock_arc(),
    );
    create_router(state, Duration::from_secs(30))
}

fn callback_request(method: &str, uri: &str, callback: &TestCallback) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in callback.headers() {
        builder = builder.header(name, value);
    }
    builder.body(Body::from(callback.form_body.clone())).expect("build request")
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes =
        axum::body::to_bytes(response.into_body(), usize::MAX).await.expect("read response body");
    String::from_utf8(bytes.to_vec()).expect("utf-8 body")
}

/// Authentic SM123 callback is acknowledged and recorded once in each table.
#[tokio::test]
async fn authentic_callback_is_acknowledged_and_recorded() {
    let env = TestEnv::new().await.expect("test env setup");
    let callback = CallbackBuilder::sms().build();

    let response =
        app(&env).oneshot(callback_request("POST", "/sms", &callback)).await.expect("request");

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[CONTENT_TYPE].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/html"));
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(body_string(response).await, EMPTY_TWIML);

    let audits = env.audit_rows().await.unwrap();
    let messages = env.message_rows().await.unwrap();
    assert_eq!(audits.len(), 1);
    assert_eq!(messages.len(), 1);

    let audit = &audits[0];
    assert!(audit.is_authentic.as_bool());
    assert_eq!(audit.is_authentic.as_i64(), 1);
    assert_eq!(audit.message_sid, "SM123");
    assert_eq!(audit.api_version, "2010-04-01");
    assert_eq!(audit.signature, callback.signature);
    assert_eq!(audit.idempotency_token, "idem-SM123");
    assert_eq!(audit.webhook_endpoint, TEST_WEBHOOK_URL);
    assert_eq!(audit.received_on, TEST_EPOCH_SECS as i64);

    let message = &messages[0];
    assert_eq!(message.sender, "+15551234567");
    assert_eq!(message.receiver, "+15557654321");
    assert_eq!(message.body, "hi");
    assert_eq!(message.received_on, audit.received_on);

    let expected_identity = deriver().derive(&callback.signature, "idem-SM123", "SM123").unwrap();
    assert_eq!(message.identity_hash, expected_identity.as_str());

    Invariants::check_all(&env).await.unwrap();
}

/// Mismatched signature is rejected with 400 but still recorded.
#[tokio::test]
async fn mismatched_signature_is_rejected_and_recorded() {
    let env = TestEnv::new().await.expect("test env setup");
    let callback = CallbackBuilder::sms().tampered_signature().build();

    let response =
        app(&env).oneshot(callback_request("POST", "/sms", &callback)).await.expect("request");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body, serde_json::json!({"error": "Invalid Twilio request found."}));

    let audits = env.audit_rows().await.unwrap();
    assert_eq!(audits.len(), 1);
    assert!(!audits[0].is_authentic.as_bool());
    assert_eq!(audits[0].is_authentic.as_i64(), 0);
    assert_eq!(audits[0].signature, callback.signature);
    assert_eq!(env.message_count().await.unwrap(), 1);

    Invariants::check_all(&env).await.unwrap();
}

/// Request signed with the wrong auth token is rejected.
#[tokio::test]
async fn wrong_auth_token_is_rejected() {
    let env = TestEnv::new().await.expect("test env setup");
    let callback = CallbackBuilder::sms().signed_with("not-the-token").build();

    let response =
        app(&env).oneshot(callback_request("POST", "/sms", &callback)).await.expect("request");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(env.audit_count().await.unwrap(), 1);
}

/// Request without any provider header gets the generic body and no rows.
#[tokio::test]
async fn request_without_provider_headers_is_not_recorded() {
    let env = TestEnv::new().await.expect("test env setup");
    let callback = CallbackBuilder::sms().build();

    let request = Request::builder()
        .method("POST")
        .uri("/sms")
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(callback.form_body.clone()))
        .expect("build request");

    let response = app(&env).oneshot(request).await.expect("request");

    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body, serde_json::json!({"error": "Not Authenticated."}));

    assert_eq!(env.audit_count().await.unwrap(), 0);
    assert_eq!(env.message_count().await.unwrap(), 0);
}

/// Any provider-namespaced header, in any case, opens the authenticated path.
#[tokio::test]
async fn any_provider_header_enters_authenticated_path() {
    let env = TestEnv::new().await.expect("test env setup");

    let request = Request::builder()
        .method("POST")
        .uri("/sms")
        .header("X-Twilio-Unrelated", "1")
        .body(Body::from("MessageSid=SM9"))
        .expect("build request");

    let response = app(&env).oneshot(request).await.expect("request");

    // No signature header: verified as false, still recorded.
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let audits = env.audit_rows().await.unwrap();
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].signature, "");
    assert_eq!(audits[0].idempotency_token, "");
    assert_eq!(audits[0].message_sid, "SM9");
}

/// Replaying the same callback stores a second, independent row.
#[tokio::test]
async fn replayed_callback_is_recorded_twice() {
    let env = TestEnv::new().await.expect("test env setup");
    let callback = CallbackBuilder::sms().build();
    let app = app(&env);

    let first = app.clone().oneshot(callback_request("POST", "/sms", &callback)).await.unwrap();
    env.clock.advance(Duration::from_secs(5));
    let second = app.oneshot(callback_request("POST", "/sms", &callback)).await.unwrap();

    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(second.status(), StatusCode::OK);

    let audits = env.audit_rows().await.unwrap();
    let messages = env.message_rows().await.unwrap();
    Invariants::replays_recorded(&audits, "SM123", 2).unwrap();
    assert_eq!(messages[0].identity_hash, messages[1].identity_hash);
    assert_eq!(audits[1].received_on - audits[0].received_on, 5);

    Invariants::check_all(&env).await.unwrap();
}

/// Every method and path reaches the same handler.
#[tokio::test]
async fn any_method_and_path_is_ingested() {
    let env = TestEnv::new().await.expect("test env setup");
    let callback = CallbackBuilder::sms().build();
    let app = app(&env);

    for (method, uri) in [("POST", "/"), ("PUT", "/deeply/nested/path"), ("GET", "/sms?x=1")] {
        let response =
            app.clone().oneshot(callback_request(method, uri, &callback)).await.expect("request");
        assert_eq!(response.status(), StatusCode::OK, "{method} {uri}");
    }

    let audits = env.audit_rows().await.unwrap();
    assert_eq!(audits.len(), 3);

    let snapshot = audits[2].raw_request_json().unwrap();
    assert_eq!(snapshot["method"], "GET");
    assert_eq!(snapshot["path"], "/sms?x=1");
}

/// Garbage body is verified as false and still recorded with empty fields,
/// with the payload kept verbatim in the snapshot.
#[tokio::test]
async fn malformed_body_is_recorded_as_is() {
    let env = TestEnv::new().await.expect("test env setup");
    let callback = CallbackBuilder::sms().build();
    let payload = r#"{"MessageSid":"SM1","Body":"spoof" BROKEN"#;

    let request = Request::builder()
        .method("POST")
        .uri("/sms")
        .header(CONTENT_TYPE, "application/json")
        .header("X-Twilio-Signature", callback.signature.clone())
        .body(Body::from(payload))
        .expect("build request");

    let response = app(&env).oneshot(request).await.expect("request");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let audits = env.audit_rows().await.unwrap();
    let messages = env.message_rows().await.unwrap();
    assert_eq!(audits[0].message_sid, "");
    assert_eq!(audits[0].account_sid, "");
    assert_eq!(messages[0].sender, "");
    assert_eq!(messages[0].body, "");

    let snapshot = audits[0].raw_request_json().unwrap();
    assert_eq!(snapshot["params"], serde_json::json!([]));
    assert_eq!(snapshot["raw_body"], payload);
}

/// Nested JSON values never become parameters but survive in the snapshot.
#[tokio::test]
async fn nested_json_values_are_kept_in_snapshot() {
    let env = TestEnv::new().await.expect("test env setup");
    let callback = CallbackBuilder::sms().build();
    let payload = r#"{"MessageSid":"SM2","Media":["evil-payload"],"Nested":{"x":"hidden"}}"#;

    let request = Request::builder()
        .method("POST")
        .uri("/sms")
        .header(CONTENT_TYPE, "application/json")
        .header("X-Twilio-Signature", callback.signature.clone())
        .body(Body::from(payload))
        .expect("build request");

    let response = app(&env).oneshot(request).await.expect("request");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let audits = env.audit_rows().await.unwrap();
    assert_eq!(audits[0].message_sid, "SM2");
    assert!(audits[0].raw_request.contains("evil-payload"));
    assert!(audits[0].raw_request.contains("hidden"));

    let snapshot = audits[0].raw_request_json().unwrap();
    assert_eq!(snapshot["raw_body"], payload);
}

/// Bytes that are not UTF-8 are stored base64-encoded.
#[tokio::test]
async fn binary_body_is_kept_base64_encoded() {
    let env = TestEnv::new().await.expect("test env setup");
    let callback = CallbackBuilder::sms().build();

    let request = Request::builder()
        .method("POST")
        .uri("/sms")
        .header("X-Twilio-Signature", callback.signature.clone())
        .body(Body::from(vec![0xff, 0x00, 0xfe]))
        .expect("build request");

    app(&env).oneshot(request).await.expect("request");

    let snapshot = env.audit_rows().await.unwrap()[0].raw_request_json().unwrap();
    assert_eq!(snapshot["raw_body"], "base64:/wD+");
}

/// JSON bodies are accepted and verified over the same parameters.
#[tokio::test]
async fn json_body_is_verified_like_form_body() {
    let env = TestEnv::new().await.expect("test env setup");
    let callback = CallbackBuilder::new().param("MessageSid", "SM77").param("Body", "json").build();

    let request = Request::builder()
        .method("POST")
        .uri("/sms")
        .header(CONTENT_TYPE, "application/json")
        .header("X-Twilio-Signature", callback.signature.clone())
        .body(Body::from(r#"{"MessageSid":"SM77","Body":"json"}"#))
        .expect("build request");

    let response = app(&env).oneshot(request).await.expect("request");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(env.message_rows().await.unwrap()[0].body, "json");
}

/// A request outliving the timeout gets a bare 408 and is not recorded.
#[tokio::test]
async fn slow_request_times_out_with_408() {
    let env = TestEnv::new().await.expect("test env setup");
    let state = AppState::new(
        env.storage().clone(),
        VerifierConfig::new(TEST_AUTH_TOKEN, TEST_WEBHOOK_URL),
        IdentityDeriver::new(IdentityConfig::default()).expect("default identity config"),
        env.clock_arc(),
    );
    let app = create_router(state, Duration::from_millis(1));
    let callback = CallbackBuilder::sms().build();

    let response = app.oneshot(callback_request("POST", "/sms", &callback)).await.expect("request");

    assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    assert!(body_string(response).await.is_empty());
    assert_eq!(env.audit_count().await.unwrap(), 0);
    assert_eq!(env.message_count().await.unwrap(), 0);
}

/// Storage failure yields a bare 500 and leaves no partial rows.
#[tokio::test]
async fn storage_failure_returns_500_without_partial_rows() {
    let env = TestEnv::new().await.expect("test env setup");
    env.fail_message_inserts().await.unwrap();
    let callback = CallbackBuilder::sms().build();

    let response =
        app(&env).oneshot(callback_request("POST", "/sms", &callback)).await.expect("request");

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body_string(response).await.is_empty());

    assert_eq!(env.audit_count().await.unwrap(), 0);
    assert_eq!(env.message_count().await.unwrap(), 0);
}

/// The audit snapshot carries the full decided context.
#[tokio::test]
async fn raw_request_snapshot_is_complete() {
    let env = TestEnv::new().await.expect("test env setup");
    let callback = CallbackBuilder::sms().build();

    app(&env).oneshot(callback_request("POST", "/sms", &callback)).await.expect("request");

    let audits = env.audit_rows().await.unwrap();
    let messages = env.message_rows().await.unwrap();
    let snapshot = audits[0].raw_request_json().unwrap();

    assert_eq!(snapshot["method"], "POST");
    assert_eq!(snapshot["headers"]["x-twilio-signature"], callback.signature.as_str());
    assert_eq!(snapshot["webhook_endpoint"], TEST_WEBHOOK_URL);
    assert_eq!(snapshot["identity_hash"], messages[0].identity_hash.as_str());
    assert_eq!(snapshot["is_authentic"], true);
    assert_eq!(snapshot["raw_body"], callback.form_body.as_str());
}
