use std::fmt;

use smol_str::SmolStr;

use crate::{name_addr::NameAddr, params, uri::SipUri};

/// A single Contact header value: either the wildcard `*` or an address.
///
/// The wildcard form only appears in REGISTER requests that drop every
/// binding for an address-of-record (RFC 3261 §10.2.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContactValue {
    Star,
    Addr(NameAddr),
}

impl ContactValue {
    /// Parses a Contact header value.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        if input == "*" {
            return Some(ContactValue::Star);
        }
        NameAddr::parse(input).map(ContactValue::Addr)
    }

    /// Returns the address form, if this is not the wildcard.
    pub fn addr(&self) -> Option<&NameAddr> {
        match self {
            ContactValue::Addr(addr) => Some(addr),
            ContactValue::Star => None,
        }
    }

    /// Returns the contact's SIP URI, if present.
    pub fn sip_uri(&self) -> Option<&SipUri> {
        self.addr().and_then(|addr| addr.sip_uri())
    }

    /// The `expires` header parameter, parsed.
    pub fn expires(&self) -> Option<u32> {
        let addr = self.addr()?;
        params::param_value(&addr.params, "expires")?.parse().ok()
    }

    /// The `q` preference parameter in [0.0, 1.0]; absent means 1.0.
    pub fn q_value(&self) -> f32 {
        self.addr()
            .and_then(|addr| params::param_value(&addr.params, "q"))
            .and_then(|value| value.parse::<f32>().ok())
            .map(|q| q.clamp(0.0, 1.0))
            .unwrap_or(1.0)
    }

    /// The `+sip.instance` media-feature tag (RFC 5626 §4.1), quotes stripped.
    pub fn instance(&self) -> Option<SmolStr> {
        let addr = self.addr()?;
        let raw = params::param_value(&addr.params, "+sip.instance")?;
        Some(SmolStr::new(raw.trim_matches('"')))
    }

    /// The `reg-id` outbound parameter (RFC 5626).
    pub fn reg_id(&self) -> Option<u32> {
        let addr = self.addr()?;
        params::param_value(&addr.params, "reg-id")?.parse().ok()
    }
}

impl fmt::Display for ContactValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContactValue::Star => f.write_str("*"),
            ContactValue::Addr(addr) => addr.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_star() {
        assert_eq!(ContactValue::parse("*"), Some(ContactValue::Star));
        assert_eq!(ContactValue::parse(" * "), Some(ContactValue::Star));
    }

    #[test]
    fn reads_registration_params() {
        let contact = ContactValue::parse(
            "<sip:client1@192.0.2.5:5070>;+sip.instance=\"<urn:uuid:abcd>\";reg-id=1;expires=120;q=0.7",
        )
        .unwrap();
        assert_eq!(contact.instance().unwrap().as_str(), "<urn:uuid:abcd>");
        assert_eq!(contact.reg_id(), Some(1));
        assert_eq!(contact.expires(), Some(120));
        assert!((contact.q_value() - 0.7).abs() < f32::EPSILON);
    }

    #[test]
    fn q_defaults_to_one() {
        let contact = ContactValue::parse("<sip:a@b.c>").unwrap();
        assert_eq!(contact.q_value(), 1.0);
    }
}
