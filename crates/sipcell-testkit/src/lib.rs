// sipcell - The Sipcell SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Test harness helpers: typed message builders and wire serialization
//! shortcuts used across the workspace's integration tests.
//!
//! # Example
//! ```
//! use sipcell_testkit::build_invite;
//! let invite = build_invite("sip:bob@example.com", "z9hG4bKtest", "call-1");
//! assert_eq!(invite.method().as_str(), "INVITE");
//! ```

use bytes::Bytes;
use sipcell_core::{
    ContactValue, Method, NameAddr, SipMsg, SipUri, TransportKind, Uri, ViaHeader,
};
use sipcell_parse::serialize_msg;
use smol_str::SmolStr;

/// Default Via host used by the builders.
pub const CLIENT_HOST: &str = "client.example.com";

fn base_request(method: Method, uri: &str, branch: &str, call_id: &str, cseq: u32) -> SipMsg {
    let uri = Uri::parse(uri).expect("test URI");
    let from = NameAddr::parse("\"Alice\" <sip:alice@example.com>;tag=1928301774").expect("from");
    let to = NameAddr::parse("<sip:bob@example.com>").expect("to");
    let mut msg = SipMsg::new_request(method, uri, SmolStr::new(call_id), from, to, cseq);
    let mut via = ViaHeader::new(TransportKind::Udp, CLIENT_HOST, Some(5060));
    via.set_branch(branch);
    msg.vias.push(via);
    msg
}

/// Builds a minimal OPTIONS request.
pub fn build_options(uri: &str, branch: &str, call_id: &str) -> SipMsg {
    base_request(Method::Options, uri, branch, call_id, 1)
}

/// Builds a minimal INVITE with a Contact.
pub fn build_invite(uri: &str, branch: &str, call_id: &str) -> SipMsg {
    let mut msg = base_request(Method::Invite, uri, branch, call_id, 1);
    msg.contacts.push(
        ContactValue::parse(&format!("<sip:alice@{CLIENT_HOST}:5060>")).expect("contact"),
    );
    msg
}

/// Builds the CANCEL matching a previously built INVITE.
pub fn build_cancel(invite: &SipMsg) -> SipMsg {
    let uri = invite.request_uri().expect("request").clone();
    let mut cancel = SipMsg::new_request(
        Method::Cancel,
        uri,
        invite.call_id.clone(),
        invite.from.clone(),
        invite.to.clone(),
        invite.cseq.seq,
    );
    cancel.vias = invite.top_via().cloned().into_iter().collect();
    cancel
}

/// Builds the ACK for a final response to an INVITE.
pub fn build_ack(invite: &SipMsg, response: &SipMsg) -> SipMsg {
    sipcell_core::msg::ack_for(invite, response).expect("ack")
}

/// Builds a REGISTER binding `contact` to the AOR in `uri`.
pub fn build_register(uri: &str, contact: &str, call_id: &str, cseq: u32) -> SipMsg {
    let aor = NameAddr::parse(&format!("<{uri}>")).expect("aor");
    let mut from = aor.clone();
    from.set_tag("reg1");
    let registrar_uri = Uri::parse(uri).expect("registrar URI");
    let mut msg = SipMsg::new_request(
        Method::Register,
        registrar_uri,
        SmolStr::new(call_id),
        from,
        aor,
        cseq,
    );
    let mut via = ViaHeader::new(TransportKind::Udp, CLIENT_HOST, Some(5070));
    via.set_branch(format!("z9hG4bKreg{cseq}"));
    msg.vias.push(via);
    msg.contacts
        .push(ContactValue::parse(contact).expect("contact"));
    msg.expires = Some(3600);
    msg
}

/// Builds a BYE within an established dialog.
pub fn build_bye(
    call_id: &str,
    local: &NameAddr,
    remote: &NameAddr,
    target: &SipUri,
    cseq: u32,
) -> SipMsg {
    let mut msg = SipMsg::new_request(
        Method::Bye,
        Uri::Sip(target.clone()),
        SmolStr::new(call_id),
        local.clone(),
        remote.clone(),
        cseq,
    );
    let mut via = ViaHeader::new(TransportKind::Udp, CLIENT_HOST, Some(5060));
    via.set_branch(format!("z9hG4bKbye{cseq}"));
    msg.vias.push(via);
    msg
}

/// Builds a tagged response to a request.
pub fn respond(request: &SipMsg, code: u16, to_tag: Option<&str>) -> SipMsg {
    let mut response = request.reply(code);
    if let Some(tag) = to_tag {
        response.to.set_tag(tag);
    }
    response
}

/// Serializes a message for transport-level assertions.
pub fn as_bytes(msg: &SipMsg) -> Bytes {
    serialize_msg(msg)
}
