#![no_main]

//! Fuzz target for the wire boundary.
//!
//! Arbitrary bytes go through JSON decoding and validation; neither step may
//! panic, and anything that validates must survive a serialize round trip.

use codoc_core::{Operation, RawOperation};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(raw) = serde_json::from_str::<RawOperation>(text) {
        if let Ok(op) = raw.validate() {
            let encoded = serde_json::to_string(&op).expect("validated op encodes");
            let decoded: Operation =
                serde_json::from_str(&encoded).expect("encoded op decodes");
            assert_eq!(op, decoded);
        }
    }

    // Decoding straight to the validated type must agree with explicit
    // validation: both accept or both reject.
    let direct = serde_json::from_str::<Operation>(text).is_ok();
    let staged = serde_json::from_str::<RawOperation>(text)
        .ok()
        .and_then(|raw| raw.validate().ok())
        .is_some();
    assert_eq!(direct, staged);
});
