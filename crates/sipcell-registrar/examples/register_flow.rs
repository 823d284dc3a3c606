// sipcell - The Sipcell SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Registers a contact, prints the minted GRUUs, and shows temporary GRUU
//! rotation on a Call-ID change.
//!
//! Run with: cargo run -p sipcell-registrar --example register_flow

use sipcell_core::params;
use sipcell_registrar::{MemoryRegStore, Registrar, RegistrarConfig};
use sipcell_testkit::build_register;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let registrar = Registrar::new(MemoryRegStore::new(), None, RegistrarConfig::default());
    let contact = "<sip:client1@127.0.0.1:5070>;+sip.instance=\"<urn:uuid:demo-device>\"";

    let response = registrar
        .handle_register(&build_register(
            "sip:client1@example.com",
            contact,
            "demo-reg-1",
            1,
        ))
        .await;
    println!("first REGISTER -> {:?}", response.code());
    print_contact_params(&response);

    // same device re-registers from a fresh boot (new Call-ID): the public
    // GRUU stays, the temporary one rotates
    let response = registrar
        .handle_register(&build_register(
            "sip:client1@example.com",
            contact,
            "demo-reg-2",
            1,
        ))
        .await;
    println!("second REGISTER (new Call-ID) -> {:?}", response.code());
    print_contact_params(&response);

    let bindings = registrar.find("sip:client1@example.com");
    println!("{} live binding(s)", bindings.len());
}

fn print_contact_params(response: &sipcell_core::SipMsg) {
    for contact in &response.contacts {
        let Some(addr) = contact.addr() else { continue };
        for name in ["expires", "pub-gruu", "temp-gruu"] {
            if let Some(value) = params::param_value(&addr.params, name) {
                println!("  {name} = {value}");
            }
        }
    }
}
