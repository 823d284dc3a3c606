// sipcell - The Sipcell SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Via header (RFC 3261 §20.42).
//!
//! The Via header records the transport path of a request and identifies
//! where responses are to be sent. The topmost Via's `branch` parameter is
//! the transaction identifier.
//!
//! # Format
//!
//! ```text
//! Via: SIP/2.0/UDP host:port;branch=z9hG4bK776asdhds
//! Via: SIP/2.0/TCP [2001:db8::1]:5060;branch=z9hG4bK776asdhds;rport
//! ```

use std::fmt;

use smol_str::SmolStr;

use crate::{
    params::{self, Params},
    transport::TransportKind,
};

/// Parsed Via header value.
///
/// The transport token is kept verbatim (unknown transports travel through a
/// proxy untouched); [`ViaHeader::transport_kind`] gives the typed view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViaHeader {
    pub transport: SmolStr,
    pub sent_by_host: SmolStr,
    pub sent_by_port: Option<u16>,
    pub params: Params,
}

impl ViaHeader {
    /// Builds a Via for a locally generated request.
    pub fn new(transport: TransportKind, host: impl Into<SmolStr>, port: Option<u16>) -> Self {
        Self {
            transport: SmolStr::new(transport.as_str()),
            sent_by_host: host.into(),
            sent_by_port: port,
            params: Params::new(),
        }
    }

    /// Parses a Via header value like `SIP/2.0/UDP host:port;branch=...`.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        let (proto, rest) = split_sent_protocol(input)?;
        let (sent_by, tail) = match rest.split_once(';') {
            Some((sent_by, tail)) => (sent_by.trim(), Some(tail)),
            None => (rest.trim(), None),
        };
        if sent_by.is_empty() {
            return None;
        }
        let (host, port) = split_sent_by(sent_by)?;
        let params = tail.map(params::parse_params).unwrap_or_default();
        Some(Self {
            transport: SmolStr::new(proto),
            sent_by_host: SmolStr::new(host),
            sent_by_port: port,
            params,
        })
    }

    /// Typed transport, when the token is one the stack knows.
    pub fn transport_kind(&self) -> Option<TransportKind> {
        TransportKind::from_token(&self.transport)
    }

    /// Returns the `branch` parameter value.
    pub fn branch(&self) -> Option<&SmolStr> {
        params::param_value(&self.params, "branch")
    }

    /// Sets (or replaces) the branch parameter.
    pub fn set_branch(&mut self, branch: impl Into<SmolStr>) {
        params::set_param(&mut self.params, "branch", Some(branch.into()));
    }

    /// Returns the `received` parameter value.
    pub fn received(&self) -> Option<&SmolStr> {
        params::param_value(&self.params, "received")
    }

    /// Returns true when the client asked for symmetric response routing
    /// (`rport` present, RFC 3581).
    pub fn wants_rport(&self) -> bool {
        params::has_param(&self.params, "rport")
    }

    /// Fills `received` and `rport` from the observed source address
    /// (RFC 3581 §4).
    pub fn stamp_source(&mut self, ip: &str, port: u16) {
        params::set_param(&mut self.params, "received", Some(SmolStr::new(ip)));
        if self.wants_rport() {
            params::set_param(
                &mut self.params,
                "rport",
                Some(SmolStr::new(port.to_string())),
            );
        }
    }

    /// The sent-by value as `host` or `host:port`.
    pub fn sent_by(&self) -> String {
        let host = if self.sent_by_host.contains(':') {
            format!("[{}]", self.sent_by_host)
        } else {
            self.sent_by_host.to_string()
        };
        match self.sent_by_port {
            Some(port) => format!("{host}:{port}"),
            None => host,
        }
    }
}

impl fmt::Display for ViaHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        out.push_str("SIP/2.0/");
        out.push_str(&self.transport);
        out.push(' ');
        out.push_str(&self.sent_by());
        params::write_params(&mut out, &self.params);
        f.write_str(&out)
    }
}

/// Splits `SIP/2.0/<transport> <rest>` returning the transport token.
fn split_sent_protocol(input: &str) -> Option<(&str, &str)> {
    let rest = input
        .strip_prefix("SIP/2.0/")
        .or_else(|| strip_prefix_ignore_case(input, "SIP/2.0/"))?;
    let split_at = rest.find(|c: char| c.is_whitespace())?;
    let proto = &rest[..split_at];
    if proto.is_empty() {
        return None;
    }
    Some((proto, rest[split_at..].trim_start()))
}

fn strip_prefix_ignore_case<'a>(input: &'a str, prefix: &str) -> Option<&'a str> {
    if input.len() >= prefix.len() && input[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&input[prefix.len()..])
    } else {
        None
    }
}

fn split_sent_by(sent_by: &str) -> Option<(&str, Option<u16>)> {
    if let Some(stripped) = sent_by.strip_prefix('[') {
        let end = stripped.find(']')?;
        let host = &stripped[..end];
        let remainder = &stripped[end + 1..];
        if remainder.is_empty() {
            return Some((host, None));
        }
        let port = remainder.strip_prefix(':')?.parse().ok()?;
        return Some((host, Some(port)));
    }
    if sent_by.matches(':').count() > 1 {
        return None;
    }
    match sent_by.split_once(':') {
        Some((host, port)) if !host.is_empty() => Some((host, Some(port.parse().ok()?))),
        Some(_) => None,
        None => Some((sent_by, None)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_via() {
        let via = ViaHeader::parse("SIP/2.0/UDP pc33.example.com;branch=z9hG4bK776asdhds").unwrap();
        assert_eq!(via.transport.as_str(), "UDP");
        assert_eq!(via.transport_kind(), Some(TransportKind::Udp));
        assert_eq!(via.sent_by_host.as_str(), "pc33.example.com");
        assert_eq!(via.sent_by_port, None);
        assert_eq!(via.branch().unwrap().as_str(), "z9hG4bK776asdhds");
    }

    #[test]
    fn parses_port_and_multiple_params() {
        let via =
            ViaHeader::parse("SIP/2.0/TCP host.example.com:5062;branch=z9hG4bKx;rport").unwrap();
        assert_eq!(via.sent_by_port, Some(5062));
        assert!(via.wants_rport());
    }

    #[test]
    fn parses_ipv6_sent_by() {
        let via = ViaHeader::parse("SIP/2.0/UDP [2001:db8::1]:5060;branch=z9hG4bKy").unwrap();
        assert_eq!(via.sent_by_host.as_str(), "2001:db8::1");
        assert_eq!(via.sent_by_port, Some(5060));
        assert_eq!(
            via.to_string(),
            "SIP/2.0/UDP [2001:db8::1]:5060;branch=z9hG4bKy"
        );
    }

    #[test]
    fn round_trips() {
        let text = "SIP/2.0/TLS edge.example.com:5061;branch=z9hG4bKabc;received=10.0.0.1";
        let via = ViaHeader::parse(text).unwrap();
        assert_eq!(via.to_string(), text);
        assert_eq!(ViaHeader::parse(&via.to_string()).unwrap(), via);
    }

    #[test]
    fn stamps_received_and_rport() {
        let mut via = ViaHeader::parse("SIP/2.0/UDP nat.example.com;rport;branch=z9hG4bKz").unwrap();
        via.stamp_source("192.0.2.9", 40612);
        assert_eq!(via.received().unwrap().as_str(), "192.0.2.9");
        assert!(via.to_string().contains("rport=40612"));
    }

    #[test]
    fn rejects_garbage() {
        assert!(ViaHeader::parse("HTTP/1.1 host").is_none());
        assert!(ViaHeader::parse("SIP/2.0/UDP").is_none());
        assert!(ViaHeader::parse("SIP/2.0/ host").is_none());
    }

    #[test]
    fn unknown_transport_is_carried_verbatim() {
        let via = ViaHeader::parse("SIP/2.0/DCCP host;branch=z9hG4bKq").unwrap();
        assert_eq!(via.transport.as_str(), "DCCP");
        assert_eq!(via.transport_kind(), None);
    }
}
