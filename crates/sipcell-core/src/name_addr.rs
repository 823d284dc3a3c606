use std::fmt;

use smol_str::SmolStr;

use crate::{
    params::{self, Params},
    uri::{SipUri, Uri},
};

/// Generic SIP name-addr structure used by From/To/Contact/Route and friends.
///
/// Header parameters (everything after the closing `>`) are kept ordered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameAddr {
    pub display_name: Option<SmolStr>,
    pub uri: Uri,
    pub params: Params,
}

impl NameAddr {
    /// Wraps a URI with no display name or parameters.
    pub fn from_uri(uri: impl Into<Uri>) -> Self {
        Self {
            display_name: None,
            uri: uri.into(),
            params: Params::new(),
        }
    }

    /// Parses a name-addr or addr-spec header value.
    ///
    /// Accepts `"Display" <sip:uri>;params`, `Display <sip:uri>;params`, and
    /// the bare `sip:uri;params` form. In the bare form the semicolon
    /// parameters are header parameters, not URI parameters (RFC 3261
    /// §20.10).
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        if let Some(open) = find_addr_open(input) {
            let close = input[open..].find('>')? + open;
            let uri = Uri::parse(&input[open + 1..close])?;
            let display = input[..open].trim();
            let display_name = if display.is_empty() {
                None
            } else {
                Some(SmolStr::new(unquote(display)))
            };
            let tail = input[close + 1..].trim_start();
            let params = match tail.strip_prefix(';') {
                Some(tail) => params::parse_params(tail),
                None if tail.is_empty() => Params::new(),
                None => return None,
            };
            Some(Self {
                display_name,
                uri,
                params,
            })
        } else {
            let (uri_part, tail) = match input.split_once(';') {
                Some((uri_part, tail)) => (uri_part.trim(), Some(tail)),
                None => (input, None),
            };
            let uri = Uri::parse(uri_part)?;
            let params = tail.map(params::parse_params).unwrap_or_default();
            Some(Self {
                display_name: None,
                uri,
                params,
            })
        }
    }

    /// Returns the inner SIP URI, if the URI is one.
    pub fn sip_uri(&self) -> Option<&SipUri> {
        self.uri.as_sip()
    }

    /// Looks up a header parameter by name.
    pub fn param(&self, name: &str) -> Option<&Option<SmolStr>> {
        params::get_param(&self.params, name)
    }

    /// Returns the `tag` parameter (From/To headers).
    pub fn tag(&self) -> Option<&SmolStr> {
        params::param_value(&self.params, "tag")
    }

    /// Sets the `tag` parameter, replacing any existing one.
    pub fn set_tag(&mut self, tag: impl Into<SmolStr>) {
        params::set_param(&mut self.params, "tag", Some(tag.into()));
    }
}

impl fmt::Display for NameAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        if let Some(display) = &self.display_name {
            out.push('"');
            out.push_str(display);
            out.push_str("\" ");
        }
        out.push('<');
        out.push_str(&self.uri.to_string());
        out.push('>');
        params::write_params(&mut out, &self.params);
        f.write_str(&out)
    }
}

/// Finds the `<` opening an enclosed addr-spec, skipping quoted display names.
fn find_addr_open(input: &str) -> Option<usize> {
    let mut in_quotes = false;
    for (idx, ch) in input.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            '<' if !in_quotes => return Some(idx),
            _ => {}
        }
    }
    None
}

fn unquote(display: &str) -> &str {
    display
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(display)
}
