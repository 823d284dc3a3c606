#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use sipcell_core::TransportKind;
use sipcell_parse::parse_message;

fuzz_target!(|data: &[u8]| {
    let buf = Bytes::copy_from_slice(data);
    // both framing modes must never panic
    let _ = parse_message(&buf, TransportKind::Udp);
    let _ = parse_message(&buf, TransportKind::Tcp);
});
