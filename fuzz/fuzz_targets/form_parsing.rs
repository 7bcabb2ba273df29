#![no_main]

//! Fuzz target for callback body parsing.
//!
//! Bodies are recorded whatever their shape, so parsing must degrade to an
//! empty parameter set instead of failing.

use libfuzzer_sys::fuzz_target;
use smsgate_api::form::{parse_params, raw_body_text, BodyFormat, BASE64_BODY_PREFIX};

fuzz_target!(|data: &[u8]| {
    // The snapshot keeps every body: verbatim text, or tagged base64.
    let raw = raw_body_text(data);
    assert!(raw.as_bytes() == data || raw.starts_with(BASE64_BODY_PREFIX));

    for format in [BodyFormat::Form, BodyFormat::Json] {
        let params = parse_params(format, data);

        // Accessors fall back to empty strings.
        let _ = params.message_sid();
        let _ = params.account_sid();
        let _ = params.sorted_pairs();
    }
});
