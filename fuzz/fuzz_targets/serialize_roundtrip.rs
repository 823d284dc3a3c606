#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use sipcell_core::TransportKind;
use sipcell_parse::{parse_message, serialize_msg, ParseOutcome};

fuzz_target!(|data: &[u8]| {
    let buf = Bytes::copy_from_slice(data);
    if let ParseOutcome::Complete(msg, _) = parse_message(&buf, TransportKind::Udp) {
        // anything the parser accepts must survive a serialize/parse cycle
        let wire = serialize_msg(&msg);
        match parse_message(&wire, TransportKind::Udp) {
            ParseOutcome::Complete(reparsed, _) => assert_eq!(*msg, *reparsed),
            other => panic!("serialized message failed to reparse: {other:?}"),
        }
    }
});
