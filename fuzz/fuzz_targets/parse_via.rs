#![no_main]

use libfuzzer_sys::fuzz_target;
use sipcell_core::ViaHeader;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        if let Some(via) = ViaHeader::parse(text) {
            let serialized = via.to_string();
            assert!(ViaHeader::parse(&serialized).is_some());
        }
    }
});
