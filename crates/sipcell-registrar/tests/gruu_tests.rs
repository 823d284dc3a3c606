// sipcell - The Sipcell SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Registration and GRUU lifecycle, end to end against the public API.

use sipcell_core::{params, ContactValue, SipUri};
use sipcell_registrar::{MemoryRegStore, Registrar, RegistrarConfig};
use sipcell_testkit::build_register;

const AOR: &str = "sip:client1@example.com";
const CONTACT: &str = "<sip:client1@127.0.0.1:5070>;+sip.instance=\"<urn:uuid:dev-1>\"";

fn registrar() -> Registrar<MemoryRegStore> {
    Registrar::new(MemoryRegStore::new(), None, RegistrarConfig::default())
}

fn param_uri(contact: &ContactValue, name: &str) -> SipUri {
    let addr = contact.addr().expect("address contact");
    let raw = params::param_value(&addr.params, name)
        .unwrap_or_else(|| panic!("{name} present"))
        .trim_matches('"')
        .to_string();
    SipUri::parse(&raw).expect("parses as URI")
}

#[tokio::test]
async fn registration_yields_resolvable_gruus() {
    let registrar = registrar();
    let response = registrar
        .handle_register(&build_register(AOR, CONTACT, "gruu-call-1", 1))
        .await;
    assert_eq!(response.code(), Some(200));
    let contact = &response.contacts[0];

    let pub_gruu = param_uri(contact, "pub-gruu");
    let temp_gruu = param_uri(contact, "temp-gruu");
    assert_eq!(pub_gruu.user.as_deref(), Some("client1"));
    assert_eq!(pub_gruu.host.as_str(), "example.com");

    let resolved = registrar.find_gruu(&pub_gruu).expect("pub-gruu resolves");
    assert_eq!(resolved.uri.port, Some(5070));
    let resolved = registrar.find_gruu(&temp_gruu).expect("temp-gruu resolves");
    assert_eq!(resolved.uri.port, Some(5070));
}

#[tokio::test]
async fn temp_gruu_rotates_with_call_id_and_pub_gruu_stays() {
    let registrar = registrar();
    let first = registrar
        .handle_register(&build_register(AOR, CONTACT, "gruu-call-1", 1))
        .await;
    let first_pub = param_uri(&first.contacts[0], "pub-gruu");
    let first_temp = param_uri(&first.contacts[0], "temp-gruu");

    // same device, fresh Call-ID
    let second = registrar
        .handle_register(&build_register(AOR, CONTACT, "gruu-call-2", 1))
        .await;
    let second_pub = param_uri(&second.contacts[0], "pub-gruu");
    let second_temp = param_uri(&second.contacts[0], "temp-gruu");

    assert_eq!(first_pub, second_pub, "public GRUU is stable");
    assert_ne!(first_temp, second_temp, "temporary GRUU rotates");
    assert!(
        registrar.find_gruu(&first_temp).is_none(),
        "old temp GRUU is invalidated"
    );
    assert!(registrar.find_gruu(&second_temp).is_some());
    assert!(registrar.find_gruu(&second_pub).is_some());

    // the bound contact itself is unchanged
    let bindings = registrar.find(AOR);
    assert_eq!(bindings.len(), 1);
    assert_eq!(bindings[0].uri.host.as_str(), "127.0.0.1");
}

#[tokio::test]
async fn replacement_register_wins_and_is_the_only_binding() {
    let registrar = registrar();
    registrar
        .handle_register(&build_register(AOR, CONTACT, "gruu-call-1", 1))
        .await;
    let moved = "<sip:client1@198.51.100.7:5071>;+sip.instance=\"<urn:uuid:dev-1>\"";
    let response = registrar
        .handle_register(&build_register(AOR, moved, "gruu-call-1", 2))
        .await;
    assert_eq!(response.code(), Some(200));
    assert_eq!(response.contacts.len(), 1);

    let bindings = registrar.find(AOR);
    assert_eq!(bindings.len(), 1);
    assert_eq!(bindings[0].uri.host.as_str(), "198.51.100.7");

    // the stable GRUU now routes to the new contact
    let pub_gruu = param_uri(&response.contacts[0], "pub-gruu");
    let resolved = registrar.find_gruu(&pub_gruu).unwrap();
    assert_eq!(resolved.uri.host.as_str(), "198.51.100.7");
}
