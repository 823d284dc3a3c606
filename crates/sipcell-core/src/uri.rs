// sipcell - The Sipcell SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::fmt;

use percent_encoding::percent_decode_str;
use smol_str::SmolStr;

use crate::{
    params::{self, Params},
    tel_uri::TelUri,
    transport::TransportKind,
};

/// Parsed representation of a SIP or SIPS URI (RFC 3261 §19.1).
///
/// Parameter and header order is preserved so that serializing a parsed URI
/// re-parses to the same abstract value. User-info and parameter case is kept
/// as received; the host is lowercased (host comparison is case-insensitive).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SipUri {
    pub sips: bool,
    pub user: Option<SmolStr>,
    pub host: SmolStr,
    pub port: Option<u16>,
    pub params: Params,
    pub headers: Vec<(SmolStr, SmolStr)>,
}

impl SipUri {
    /// Constructs a bare `sip:` URI for the given host.
    pub fn new(host: impl Into<SmolStr>) -> Self {
        Self {
            sips: false,
            user: None,
            host: host.into(),
            port: None,
            params: Params::new(),
            headers: Vec::new(),
        }
    }

    /// Builder-style helper setting the user part.
    pub fn with_user(mut self, user: impl Into<SmolStr>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Builder-style helper setting the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Builder-style helper appending a parameter.
    pub fn with_param(mut self, name: &str, value: Option<&str>) -> Self {
        self.params
            .push((SmolStr::new(name), value.map(SmolStr::new)));
        self
    }

    /// Attempts to parse a SIP or SIPS URI from the provided string.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        let (scheme, rest) = input.split_once(':')?;
        let sips = scheme.eq_ignore_ascii_case("sips");
        if !sips && !scheme.eq_ignore_ascii_case("sip") {
            return None;
        }

        let (addr_part, headers_part) = match rest.split_once('?') {
            Some((addr, headers)) => (addr, Some(headers)),
            None => (rest, None),
        };

        let (base, params) = match addr_part.split_once(';') {
            Some((base, tail)) => (base.trim(), params::parse_params(tail)),
            None => (addr_part.trim(), Params::new()),
        };

        // User-info is stored verbatim (escapes included) so serialization
        // reproduces the wire form; [`SipUri::user_decoded`] unescapes.
        let (user, host_port) = match base.rsplit_once('@') {
            Some((user, host)) => {
                let user = user.trim();
                if user.is_empty() {
                    return None;
                }
                percent_decode_str(user).decode_utf8().ok()?;
                (Some(SmolStr::new(user)), host.trim())
            }
            None => (None, base),
        };

        if host_port.is_empty() {
            return None;
        }
        let (host, port) = split_host_port(host_port)?;
        let host = host.to_ascii_lowercase();

        let mut headers = Vec::new();
        if let Some(headers_part) = headers_part {
            for pair in headers_part.split('&') {
                if pair.is_empty() {
                    continue;
                }
                let (name, value) = pair.split_once('=')?;
                headers.push((SmolStr::new(name), SmolStr::new(value)));
            }
        }

        Some(Self {
            sips,
            user,
            host: SmolStr::new(host),
            port,
            params,
            headers,
        })
    }

    /// Returns the scheme token, lowercased.
    pub fn scheme(&self) -> &'static str {
        if self.sips {
            "sips"
        } else {
            "sip"
        }
    }

    /// Returns the `transport=` parameter as a typed transport, if present.
    pub fn transport(&self) -> Option<TransportKind> {
        params::param_value(&self.params, "transport")
            .and_then(|value| TransportKind::from_token(value))
    }

    /// Transport the URI resolves to: the explicit `transport=` parameter, or
    /// TLS for a bare SIPS URI, or UDP otherwise.
    pub fn effective_transport(&self) -> TransportKind {
        match self.transport() {
            Some(kind) => kind,
            None if self.sips => TransportKind::Tls,
            None => TransportKind::Udp,
        }
    }

    /// Port the URI addresses, falling back to the transport default.
    pub fn effective_port(&self) -> u16 {
        self.port
            .unwrap_or_else(|| self.effective_transport().default_port())
    }

    /// The user part with percent-escapes decoded.
    pub fn user_decoded(&self) -> Option<SmolStr> {
        let user = self.user.as_ref()?;
        percent_decode_str(user)
            .decode_utf8()
            .ok()
            .map(|decoded| SmolStr::new(decoded))
    }

    /// Looks up a URI parameter by name (case-insensitive).
    pub fn param(&self, name: &str) -> Option<&Option<SmolStr>> {
        params::get_param(&self.params, name)
    }

    /// Returns true when the `lr` loose-routing parameter is present.
    pub fn is_loose_router(&self) -> bool {
        params::has_param(&self.params, "lr")
    }

    /// Compares two URIs for addressing equivalence: scheme, user (case
    /// sensitive), host (already lowercased), and effective port.
    pub fn addresses_same(&self, other: &SipUri) -> bool {
        self.sips == other.sips
            && self.user == other.user
            && self.host == other.host
            && self.effective_port() == other.effective_port()
    }
}

impl fmt::Display for SipUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        out.push_str(self.scheme());
        out.push(':');
        if let Some(user) = &self.user {
            out.push_str(user);
            out.push('@');
        }
        if self.host.contains(':') {
            out.push('[');
            out.push_str(&self.host);
            out.push(']');
        } else {
            out.push_str(&self.host);
        }
        if let Some(port) = self.port {
            out.push(':');
            out.push_str(&port.to_string());
        }
        params::write_params(&mut out, &self.params);
        let mut first = true;
        for (name, value) in &self.headers {
            out.push(if first { '?' } else { '&' });
            first = false;
            out.push_str(name);
            out.push('=');
            out.push_str(value);
        }
        f.write_str(&out)
    }
}

/// Unified URI type covering the schemes a Request-URI may carry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Uri {
    /// SIP or SIPS URI.
    Sip(SipUri),
    /// Telephone URI (RFC 3966).
    Tel(TelUri),
    /// `mailto:` URI, kept verbatim.
    Mailto(SmolStr),
}

impl Uri {
    /// Parses a URI string, detecting the scheme.
    pub fn parse(input: &str) -> Option<Self> {
        let trimmed = input.trim();
        let scheme = trimmed.split(':').next()?;
        if scheme.eq_ignore_ascii_case("sip") || scheme.eq_ignore_ascii_case("sips") {
            SipUri::parse(trimmed).map(Uri::Sip)
        } else if scheme.eq_ignore_ascii_case("tel") {
            TelUri::parse(trimmed).map(Uri::Tel)
        } else if scheme.eq_ignore_ascii_case("mailto") {
            let rest = &trimmed[scheme.len() + 1..];
            if rest.is_empty() {
                None
            } else {
                Some(Uri::Mailto(SmolStr::new(trimmed)))
            }
        } else {
            None
        }
    }

    /// Returns the inner SipUri if this is a SIP URI.
    pub fn as_sip(&self) -> Option<&SipUri> {
        match self {
            Uri::Sip(uri) => Some(uri),
            _ => None,
        }
    }

    /// Returns the inner TelUri if this is a tel URI.
    pub fn as_tel(&self) -> Option<&TelUri> {
        match self {
            Uri::Tel(uri) => Some(uri),
            _ => None,
        }
    }

    /// Returns true if this is a SIP or SIPS URI.
    pub fn is_sip(&self) -> bool {
        matches!(self, Uri::Sip(_))
    }

    /// Scheme token of the URI, lowercased.
    pub fn scheme(&self) -> &str {
        match self {
            Uri::Sip(uri) => uri.scheme(),
            Uri::Tel(_) => "tel",
            Uri::Mailto(_) => "mailto",
        }
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Uri::Sip(uri) => uri.fmt(f),
            Uri::Tel(uri) => uri.fmt(f),
            Uri::Mailto(raw) => f.write_str(raw),
        }
    }
}

impl From<SipUri> for Uri {
    fn from(uri: SipUri) -> Self {
        Uri::Sip(uri)
    }
}

impl From<TelUri> for Uri {
    fn from(uri: TelUri) -> Self {
        Uri::Tel(uri)
    }
}

/// Splits a host[:port] or IPv6 literal "[host]:port" string.
fn split_host_port(input: &str) -> Option<(&str, Option<u16>)> {
    if let Some(stripped) = input.strip_prefix('[') {
        let end = stripped.find(']')?;
        let host = &stripped[..end];
        if host.is_empty() {
            return None;
        }
        let remainder = &stripped[end + 1..];
        if remainder.is_empty() {
            return Some((host, None));
        }
        let port = remainder.strip_prefix(':')?.parse().ok()?;
        Some((host, Some(port)))
    } else {
        if input.matches(':').count() > 1 {
            return None;
        }
        match input.split_once(':') {
            Some((host, port)) if !host.is_empty() => {
                let port = port.parse().ok()?;
                Some((host, Some(port)))
            }
            Some(_) => None,
            None => Some((input, None)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_sip_uri() {
        let uri = SipUri::parse("sip:Alice@Example.COM:5070;transport=TCP;lr?subject=hi").unwrap();
        assert!(!uri.sips);
        assert_eq!(uri.user.as_deref(), Some("Alice"));
        assert_eq!(uri.host.as_str(), "example.com");
        assert_eq!(uri.port, Some(5070));
        assert_eq!(uri.transport(), Some(TransportKind::Tcp));
        assert!(uri.is_loose_router());
        assert_eq!(uri.headers[0].0.as_str(), "subject");
    }

    #[test]
    fn serializes_with_preserved_order() {
        let text = "sip:bob@example.com;maddr=10.0.0.1;transport=udp;x";
        let uri = SipUri::parse(text).unwrap();
        assert_eq!(uri.to_string(), text);
        assert_eq!(SipUri::parse(&uri.to_string()).unwrap(), uri);
    }

    #[test]
    fn sips_defaults_to_tls() {
        let uri = SipUri::parse("sips:bob@example.com").unwrap();
        assert!(uri.sips);
        assert_eq!(uri.effective_transport(), TransportKind::Tls);
        assert_eq!(uri.effective_port(), 5061);
    }

    #[test]
    fn plain_sip_defaults_to_udp_5060() {
        let uri = SipUri::parse("sip:example.com").unwrap();
        assert_eq!(uri.effective_transport(), TransportKind::Udp);
        assert_eq!(uri.effective_port(), 5060);
    }

    #[test]
    fn ipv6_hosts_need_brackets() {
        let uri = SipUri::parse("sip:[2001:db8::1]:6060").unwrap();
        assert_eq!(uri.host.as_str(), "2001:db8::1");
        assert_eq!(uri.port, Some(6060));
        assert_eq!(uri.to_string(), "sip:[2001:db8::1]:6060");
        assert!(SipUri::parse("sip:2001:db8::1").is_none());
    }

    #[test]
    fn user_escapes_survive_and_decode_on_demand() {
        let uri = SipUri::parse("sip:alice%20smith@example.com").unwrap();
        assert_eq!(uri.user.as_deref(), Some("alice%20smith"));
        assert_eq!(uri.user_decoded().as_deref(), Some("alice smith"));
        assert_eq!(uri.to_string(), "sip:alice%20smith@example.com");
    }

    #[test]
    fn rejects_empty_user_and_host() {
        assert!(SipUri::parse("sip:@example.com").is_none());
        assert!(SipUri::parse("sip:").is_none());
        assert!(SipUri::parse("http://example.com").is_none());
    }

    #[test]
    fn uri_enum_detects_schemes() {
        assert!(Uri::parse("sip:a@b.c").unwrap().is_sip());
        assert_eq!(Uri::parse("tel:+15551234567").unwrap().scheme(), "tel");
        assert_eq!(
            Uri::parse("mailto:a@example.com").unwrap().scheme(),
            "mailto"
        );
        assert!(Uri::parse("ftp://x").is_none());
    }

    #[test]
    fn addressing_equivalence_uses_effective_port() {
        let a = SipUri::parse("sip:bob@example.com").unwrap();
        let b = SipUri::parse("sip:bob@example.com:5060").unwrap();
        assert!(a.addresses_same(&b));
        let c = SipUri::parse("sip:bob@example.com:5070").unwrap();
        assert!(!a.addresses_same(&c));
    }
}
