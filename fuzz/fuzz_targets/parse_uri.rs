#![no_main]

use libfuzzer_sys::fuzz_target;
use sipcell_core::Uri;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        if let Some(uri) = Uri::parse(text) {
            // serialization of anything we accept must re-parse
            let serialized = uri.to_string();
            assert!(Uri::parse(&serialized).is_some());
        }
    }
});
