// sipcell - The Sipcell SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Request and response forwarding per RFC 3261 §16.6 / §16.7.

use smol_str::SmolStr;
use tracing::debug;

use sipcell_core::{
    ContactValue, NameAddr, SipMsg, SipUri, TransportKind, Uri, ViaHeader,
};

use crate::{loop_check, ProxyOpts};

/// How this proxy names itself in Via, Record-Route, and Path.
#[derive(Debug, Clone)]
pub struct ProxyIdentity {
    pub host: SmolStr,
    pub port: u16,
    pub transport: TransportKind,
}

impl ProxyIdentity {
    pub fn new(host: impl Into<SmolStr>, port: u16, transport: TransportKind) -> Self {
        Self {
            host: host.into(),
            port,
            transport,
        }
    }

    /// The loose-routing URI inserted in Record-Route / Path.
    pub fn record_route_uri(&self) -> SipUri {
        SipUri::new(self.host.clone())
            .with_port(self.port)
            .with_param("lr", None)
    }

    /// True when a route URI addresses this proxy.
    pub fn owns(&self, uri: &SipUri) -> bool {
        uri.host == self.host && uri.effective_port() == self.port
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardError {
    /// Max-Forwards reached zero; answer 483.
    MaxForwardsExhausted,
    /// Only requests can be forwarded.
    NotARequest,
}

impl std::fmt::Display for ForwardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ForwardError::MaxForwardsExhausted => write!(f, "Max-Forwards exhausted"),
            ForwardError::NotARequest => write!(f, "responses cannot be forwarded as requests"),
        }
    }
}

impl std::error::Error for ForwardError {}

/// Prepares a copy of `original` for forwarding to `target`.
///
/// Performs the §16.6 steps: Route rewriting for loose routing, Request-URI
/// replacement, Max-Forwards decrement, fresh Via on top, and the optional
/// Record-Route / Path / Contact / header insertions from `opts`. Returns
/// the prepared request and the branch minted for it.
pub fn prepare_forward(
    original: &SipMsg,
    target: &SipUri,
    local: &ProxyIdentity,
    opts: &ProxyOpts,
) -> Result<(SipMsg, SmolStr), ForwardError> {
    if !original.is_request() {
        return Err(ForwardError::NotARequest);
    }
    let mut forwarded = original.clone();

    match opts.max_forwards_override {
        Some(value) => forwarded.max_forwards = value,
        None => {
            if forwarded.max_forwards == 0 {
                return Err(ForwardError::MaxForwardsExhausted);
            }
            forwarded.max_forwards -= 1;
        }
    }

    if opts.remove_routes {
        forwarded.routes.clear();
    } else {
        strip_own_route(&mut forwarded, local);
    }

    // Loose routing: when a route remains the request travels to that hop
    // and the Request-URI stays the fork target.
    if let sipcell_core::MsgKind::Request { uri, .. } = &mut forwarded.kind {
        *uri = Uri::Sip(target.clone());
    }

    for (name, value) in &opts.insert_headers {
        forwarded.headers.push(name.clone(), value.clone());
    }

    if opts.record_route {
        forwarded
            .record_routes
            .insert(0, NameAddr::from_uri(local.record_route_uri()));
    }

    if opts.path {
        forwarded
            .headers
            .push("Path", format!("<{}>", local.record_route_uri()));
    }

    if opts.add_contact && forwarded.contacts.is_empty() {
        let contact_uri = SipUri::new(local.host.clone()).with_port(local.port);
        forwarded
            .contacts
            .push(ContactValue::Addr(NameAddr::from_uri(contact_uri)));
    }

    let fingerprint = loop_check::fork_fingerprint(original);
    let branch = loop_check::mint_branch(&fingerprint);
    let mut via = ViaHeader::new(local.transport, local.host.clone(), Some(local.port));
    via.set_branch(branch.clone());
    forwarded.vias.insert(0, via);

    debug!(target = %target, branch = %branch, "request prepared for forwarding");
    Ok((forwarded, branch))
}

/// Drops the topmost Route when it addresses this proxy (loose routing,
/// RFC 3261 §16.4).
fn strip_own_route(msg: &mut SipMsg, local: &ProxyIdentity) {
    let owns = msg
        .routes
        .first()
        .and_then(|route| route.sip_uri())
        .map(|uri| local.owns(uri))
        .unwrap_or(false);
    if owns {
        msg.routes.remove(0);
    }
}

/// Prepares a downstream response for the upstream hop: pops the topmost
/// Via (ours). Returns None when no Via would remain, meaning the response
/// was addressed to this proxy itself and must not be forwarded.
pub fn prepare_response_upstream(response: &SipMsg) -> Option<SipMsg> {
    if response.vias.len() < 2 {
        return None;
    }
    let mut upstream = response.clone();
    upstream.vias.remove(0);
    Some(upstream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sipcell_testkit::{build_invite, respond};

    fn local() -> ProxyIdentity {
        ProxyIdentity::new("proxy.example.com", 5060, TransportKind::Udp)
    }

    fn target() -> SipUri {
        SipUri::parse("sip:c1@192.0.2.10:5070").unwrap()
    }

    #[test]
    fn forwarding_decrements_max_forwards_and_pushes_via() {
        let invite = build_invite("sip:bob@example.com", "z9hG4bKup", "call-f1");
        let (forwarded, branch) = prepare_forward(&invite, &target(), &local(), &ProxyOpts::default()).unwrap();
        assert_eq!(forwarded.max_forwards, 69);
        assert_eq!(forwarded.vias.len(), 2);
        assert_eq!(forwarded.top_branch().unwrap(), &branch);
        assert!(branch.starts_with("z9hG4bK"));
        assert_eq!(
            forwarded.request_uri().unwrap().as_sip().unwrap().host.as_str(),
            "192.0.2.10"
        );
        // upstream Via preserved below ours
        assert_eq!(forwarded.vias[1].branch().unwrap().as_str(), "z9hG4bKup");
    }

    #[test]
    fn exhausted_max_forwards_is_an_error() {
        let mut invite = build_invite("sip:bob@example.com", "z9hG4bKmf", "call-f2");
        invite.max_forwards = 0;
        let err = prepare_forward(&invite, &target(), &local(), &ProxyOpts::default()).unwrap_err();
        assert_eq!(err, ForwardError::MaxForwardsExhausted);
    }

    #[test]
    fn record_route_inserts_loose_route() {
        let invite = build_invite("sip:bob@example.com", "z9hG4bKrr", "call-f3");
        let opts = ProxyOpts {
            record_route: true,
            ..ProxyOpts::default()
        };
        let (forwarded, _) = prepare_forward(&invite, &target(), &local(), &opts).unwrap();
        let rr = forwarded.record_routes.first().unwrap().sip_uri().unwrap();
        assert_eq!(rr.host.as_str(), "proxy.example.com");
        assert!(rr.is_loose_router());
    }

    #[test]
    fn own_route_is_stripped() {
        let mut invite = build_invite("sip:bob@example.com", "z9hG4bKrt", "call-f4");
        invite.routes = vec![
            NameAddr::parse("<sip:proxy.example.com;lr>").unwrap(),
            NameAddr::parse("<sip:next.example.com;lr>").unwrap(),
        ];
        let (forwarded, _) = prepare_forward(&invite, &target(), &local(), &ProxyOpts::default()).unwrap();
        assert_eq!(forwarded.routes.len(), 1);
        assert_eq!(
            forwarded.routes[0].sip_uri().unwrap().host.as_str(),
            "next.example.com"
        );
    }

    #[test]
    fn max_forwards_override_wins() {
        let invite = build_invite("sip:bob@example.com", "z9hG4bKov", "call-f5");
        let opts = ProxyOpts {
            max_forwards_override: Some(10),
            ..ProxyOpts::default()
        };
        let (forwarded, _) = prepare_forward(&invite, &target(), &local(), &opts).unwrap();
        assert_eq!(forwarded.max_forwards, 10);
    }

    #[test]
    fn response_upstream_pops_our_via() {
        let invite = build_invite("sip:bob@example.com", "z9hG4bKvv", "call-f6");
        let (forwarded, _) = prepare_forward(&invite, &target(), &local(), &ProxyOpts::default()).unwrap();
        let response = respond(&forwarded, 200, Some("dl"));
        let upstream = prepare_response_upstream(&response).unwrap();
        assert_eq!(upstream.vias.len(), 1);
        assert_eq!(upstream.top_branch().unwrap().as_str(), "z9hG4bKvv");
    }

    #[test]
    fn response_for_the_proxy_itself_is_not_forwarded() {
        let invite = build_invite("sip:bob@example.com", "z9hG4bKself", "call-f7");
        let response = respond(&invite, 200, Some("dl"));
        assert!(prepare_response_upstream(&response).is_none());
    }

    #[test]
    fn inserted_headers_and_path() {
        let invite = build_invite("sip:bob@example.com", "z9hG4bKih", "call-f8");
        let opts = ProxyOpts {
            path: true,
            insert_headers: vec![(SmolStr::new("X-Billing"), SmolStr::new("gold"))],
            ..ProxyOpts::default()
        };
        let (forwarded, _) = prepare_forward(&invite, &target(), &local(), &opts).unwrap();
        assert_eq!(forwarded.headers.get("X-Billing").unwrap().as_str(), "gold");
        assert!(forwarded.headers.get("Path").unwrap().contains("proxy.example.com"));
    }
}
