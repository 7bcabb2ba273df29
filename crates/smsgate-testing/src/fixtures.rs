//! Callback builders and fixtures for deterministic testing.
//!
//! Signatures are computed here independently of the service's verifier, so
//! a verifier regression cannot hide behind a fixture that shares its code.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use smsgate_core::CallbackParams;

type HmacSha1 = Hmac<Sha1>;

/// Auth token shared by fixtures and the service under test.
pub const TEST_AUTH_TOKEN: &str = "12345";

/// Canonical webhook URL shared by fixtures and the service under test.
pub const TEST_WEBHOOK_URL: &str = "https://mycompany.com/myapp.php?foo=1&bar=2";

/// Signature header name.
pub const SIGNATURE_HEADER: &str = "X-Twilio-Signature";

/// Idempotency token header name.
pub const IDEMPOTENCY_HEADER: &str = "I-Twilio-Idempotency-Token";

/// Computes the provider signature for `url` and `params`.
///
/// HMAC-SHA1 over the URL followed by every key and value, sorted by key
/// and then value, base64 encoded with padding.
pub fn twilio_signature(auth_token: &str, url: &str, params: &[(&str, &str)]) -> String {
    let mut sorted = params.to_vec();
    sorted.sort_unstable();

    let mut data = String::from(url);
    for (key, value) in sorted {
        data.push_str(key);
        data.push_str(value);
    }

    let mut mac =
        HmacSha1::new_from_slice(auth_token.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(data.as_bytes());
    STANDARD.encode(mac.finalize().into_bytes())
}

/// Builder for provider callbacks.
pub struct CallbackBuilder {
    params: Vec<(String, String)>,
    auth_token: String,
    url: String,
    signature: Option<String>,
    idempotency_token: Option<String>,
    tamper: bool,
}

impl CallbackBuilder {
    /// Creates a builder with no parameters, signed with the test token.
    pub fn new() -> Self {
        Self {
            params: Vec::new(),
            auth_token: TEST_AUTH_TOKEN.to_string(),
            url: TEST_WEBHOOK_URL.to_string(),
            signature: None,
            idempotency_token: Some("idem-SM123".to_string()),
            tamper: false,
        }
    }

    /// Creates the reference SMS callback for message `SM123`.
    pub fn sms() -> Self {
        Self::new()
            .param("MessageSid", "SM123")
            .param("AccountSid", "AC0123456789abcdef0123456789abcdef")
            .param("ApiVersion", "2010-04-01")
            .param("From", "+15551234567")
            .param("To", "+15557654321")
            .param("Body", "hi")
    }

    /// Appends a body parameter. Repeated keys are kept.
    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Replaces the value of every parameter named `key`, or appends it.
    #[must_use]
    pub fn set(mut self, key: &str, value: impl Into<String>) -> Self {
        let value = value.into();
        self.params.retain(|(k, _)| k != key);
        self.params.push((key.to_string(), value));
        self
    }

    /// Sets the message body text.
    #[must_use]
    pub fn body(self, text: impl Into<String>) -> Self {
        self.set("Body", text)
    }

    /// Sets the provider message identifier.
    #[must_use]
    pub fn message_sid(self, sid: impl Into<String>) -> Self {
        self.set("MessageSid", sid)
    }

    /// Signs with a different auth token than the service holds.
    #[must_use]
    pub fn signed_with(mut self, auth_token: impl Into<String>) -> Self {
        self.auth_token = auth_token.into();
        self
    }

    /// Signs against a different URL than the one configured.
    #[must_use]
    pub fn signed_for_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Uses a fixed signature header value instead of computing one.
    #[must_use]
    pub fn signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    /// Flips one character of the computed signature.
    #[must_use]
    pub fn tampered_signature(mut self) -> Self {
        self.tamper = true;
        self
    }

    /// Sets the idempotency token header value.
    #[must_use]
    pub fn idempotency_token(mut self, token: impl Into<String>) -> Self {
        self.idempotency_token = Some(token.into());
        self
    }

    /// Omits the idempotency token header.
    #[must_use]
    pub fn without_idempotency_token(mut self) -> Self {
        self.idempotency_token = None;
        self
    }

    /// Builds the callback, computing its signature.
    pub fn build(self) -> TestCallback {
        let pairs: Vec<(&str, &str)> =
            self.params.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();

        let signature = match self.signature {
            Some(signature) => signature,
            None => twilio_signature(&self.auth_token, &self.url, &pairs),
        };
        let signature = if self.tamper { flip_first_char(&signature) } else { signature };

        let form_body = serde_urlencoded::to_string(&self.params).unwrap_or_default();

        TestCallback {
            params: CallbackParams::new(self.params),
            signature,
            idempotency_token: self.idempotency_token,
            form_body,
        }
    }
}

impl Default for CallbackBuilder {
    fn default() -> Self {
        Self::sms()
    }
}

/// Replaces the first character with a different base64 character.
pub fn flip_first_char(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => {
            let replacement = if first == 'A' { 'B' } else { 'A' };
            std::iter::once(replacement).chain(chars).collect()
        },
        None => "A".to_string(),
    }
}

/// Provider callback ready to send.
#[derive(Debug, Clone)]
pub struct TestCallback {
    /// Body parameters in send order
    pub params: CallbackParams,
    /// `X-Twilio-Signature` header value
    pub signature: String,
    /// `I-Twilio-Idempotency-Token` header value, if sent
    pub idempotency_token: Option<String>,
    /// Body encoded as `application/x-www-form-urlencoded`
    pub form_body: String,
}

impl TestCallback {
    /// Header pairs the provider would send with this callback.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("content-type", "application/x-www-form-urlencoded".to_string()),
            (SIGNATURE_HEADER, self.signature.clone()),
        ];
        if let Some(token) = &self.idempotency_token {
            headers.push((IDEMPOTENCY_HEADER, token.clone()));
        }
        headers
    }

    /// Message identifier carried in the body.
    pub fn message_sid(&self) -> &str {
        self.params.message_sid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Reference vector from the provider's security documentation.
    #[test]
    fn signature_matches_documented_vector() {
        let params = [
            ("CallSid", "CA1234567890ABCDE"),
            ("Caller", "+12349013030"),
            ("Digits", "1234"),
            ("From", "+12349013030"),
            ("To", "+18005551212"),
        ];

        let signature = twilio_signature(TEST_AUTH_TOKEN, TEST_WEBHOOK_URL, &params);

        assert_eq!(signature, "0/KCTR6DLpKmkAf8muzZqo1nDgQ=");
    }

    #[test]
    fn signature_ignores_parameter_order() {
        let forward = twilio_signature("token", "https://a.example/x", &[("A", "1"), ("B", "2")]);
        let reverse = twilio_signature("token", "https://a.example/x", &[("B", "2"), ("A", "1")]);
        assert_eq!(forward, reverse);
    }

    #[test]
    fn tampered_signature_differs_by_one_char() {
        let honest = CallbackBuilder::sms().build();
        let tampered = CallbackBuilder::sms().tampered_signature().build();

        assert_ne!(honest.signature, tampered.signature);
        assert_eq!(honest.signature.len(), tampered.signature.len());
        assert_eq!(honest.signature[1..], tampered.signature[1..]);
    }

    #[test]
    fn form_body_round_trips_parameters() {
        let callback = CallbackBuilder::sms().body("hello world & more").build();
        let decoded: Vec<(String, String)> =
            serde_urlencoded::from_str(&callback.form_body).expect("valid form body");

        assert!(decoded.contains(&("Body".to_string(), "hello world & more".to_string())));
        assert_eq!(callback.message_sid(), "SM123");
    }

    #[test]
    fn headers_omit_missing_idempotency_token() {
        let callback = CallbackBuilder::sms().without_idempotency_token().build();
        assert!(callback.headers().iter().all(|(name, _)| *name != IDEMPOTENCY_HEADER));
    }
}
