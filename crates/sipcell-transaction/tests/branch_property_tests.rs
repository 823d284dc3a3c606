// sipcell - The Sipcell SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Properties of branch generation and legacy key synthesis.

use proptest::prelude::*;
use sipcell_core::{has_magic_cookie, Method, NameAddr, SipMsg, SipUri, Uri, ViaHeader};
use sipcell_transaction::{effective_branch, generate_branch, TransactionKey};

fn request_with_branch(branch: &str, call_id: &str, cseq: u32) -> SipMsg {
    let mut msg = SipMsg::new_request(
        Method::Invite,
        Uri::Sip(SipUri::parse("sip:bob@example.com").unwrap()),
        call_id.to_owned(),
        NameAddr::parse("<sip:alice@example.com>;tag=ff").unwrap(),
        NameAddr::parse("<sip:bob@example.com>").unwrap(),
        cseq,
    );
    msg.vias.push(
        ViaHeader::parse(&format!("SIP/2.0/UDP host.example.com;branch={branch}")).unwrap(),
    );
    msg
}

#[test]
fn generated_branches_are_unique() {
    let mut seen = std::collections::HashSet::new();
    for _ in 0..1000 {
        let branch = generate_branch();
        assert!(has_magic_cookie(&branch));
        assert!(seen.insert(branch));
    }
}

proptest! {
    #[test]
    fn cookie_branches_pass_through(suffix in "[a-zA-Z0-9]{1,24}") {
        let branch = format!("z9hG4bK{suffix}");
        let msg = request_with_branch(&branch, "call-prop", 1);
        let eff = effective_branch(&msg).unwrap();
        prop_assert_eq!(eff.as_str(), branch.as_str());
    }

    #[test]
    fn legacy_branches_are_deterministic(
        branch in "[a-y][a-z0-9]{0,12}",
        call_id in "[a-z0-9]{4,16}",
        cseq in 1u32..100000,
    ) {
        let msg_a = request_with_branch(&branch, &call_id, cseq);
        let msg_b = request_with_branch(&branch, &call_id, cseq);
        let key_a = TransactionKey::from_msg(&msg_a, true).unwrap();
        let key_b = TransactionKey::from_msg(&msg_b, true).unwrap();
        prop_assert_eq!(&key_a, &key_b);
        prop_assert!(key_a.branch.starts_with("legacy-"));

        // a different CSeq is a different legacy transaction
        let msg_c = request_with_branch(&branch, &call_id, cseq + 1);
        let key_c = TransactionKey::from_msg(&msg_c, true).unwrap();
        prop_assert_ne!(key_a, key_c);
    }
}
