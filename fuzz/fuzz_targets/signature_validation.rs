#![no_main]

//! Fuzz target for provider signature validation.
//!
//! Feeds arbitrary signatures, secrets and bodies through the verifier. The
//! verifier must return a verdict for every input and never panic.

use libfuzzer_sys::fuzz_target;
use smsgate_api::{
    crypto::compute_signature,
    form::{parse_params, BodyFormat},
    validate_signature, verify,
};

const URL: &str = "https://mycompany.com/myapp.php?foo=1&bar=2";

fuzz_target!(|data: &[u8]| {
    let (head, tail) = data.split_at(data.len() / 2);
    let claimed = String::from_utf8_lossy(head);
    let params = parse_params(BodyFormat::Form, tail);

    for token in ["", "12345", claimed.as_ref()] {
        let result = validate_signature(token, &claimed, URL, &params);
        assert_eq!(result.is_valid, verify(token, &claimed, URL, &params));
        assert_eq!(result.is_valid, result.error_message.is_none());

        // An honest signature over the fuzzed body always verifies.
        if let Ok(honest) = compute_signature(token, URL, &params) {
            assert!(verify(token, &honest, URL, &params));
        }
    }
});
