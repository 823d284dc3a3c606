// sipcell - The Sipcell SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Parsers for individual header values.

use std::collections::HashMap;
use std::time::SystemTime;

use once_cell::sync::Lazy;
use sipcell_core::{ContactValue, DateHeader, EventHeader, NameAddr, TokenList, ViaHeader};
use smol_str::SmolStr;

/// Compact header form -> canonical long form (RFC 3261 §7.3.3).
static COMPACT_FORMS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("i", "Call-ID"),
        ("f", "From"),
        ("t", "To"),
        ("m", "Contact"),
        ("l", "Content-Length"),
        ("v", "Via"),
        ("s", "Subject"),
        ("k", "Supported"),
        ("o", "Event"),
        ("e", "Content-Encoding"),
        ("c", "Content-Type"),
        ("r", "Refer-To"),
        ("b", "Referred-By"),
        ("u", "Allow-Events"),
    ])
});

/// Splits a comma-combined header value into its elements, respecting
/// double quotes and angle brackets (RFC 3261 §7.3.1).
pub fn split_header_values(value: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut in_angles = false;
    for (idx, ch) in value.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            '<' if !in_quotes => in_angles = true,
            '>' if !in_quotes => in_angles = false,
            ',' if !in_quotes && !in_angles => {
                pieces.push(value[start..idx].trim());
                start = idx + 1;
            }
            _ => {}
        }
    }
    pieces.push(value[start..].trim());
    pieces.retain(|p| !p.is_empty());
    pieces
}

/// Parses one or more Via values (possibly comma-combined).
pub fn parse_via_values(value: &str) -> Option<Vec<ViaHeader>> {
    split_header_values(value)
        .into_iter()
        .map(ViaHeader::parse)
        .collect()
}

/// Parses a comma-combined list of name-addr values (Route/Record-Route).
pub fn parse_name_addr_values(value: &str) -> Option<Vec<NameAddr>> {
    split_header_values(value)
        .into_iter()
        .map(NameAddr::parse)
        .collect()
}

/// Parses a comma-combined Contact header, allowing the `*` wildcard.
pub fn parse_contact_values(value: &str) -> Option<Vec<ContactValue>> {
    split_header_values(value)
        .into_iter()
        .map(ContactValue::parse)
        .collect()
}

/// Parses a token list header (Require/Supported/Allow).
pub fn parse_token_list(value: &str) -> TokenList {
    TokenList::parse(value)
}

/// Parses a comma-separated list of unsigned integers.
pub fn parse_integer_list(value: &str) -> Option<Vec<u32>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| t.parse::<u32>().ok())
        .collect()
}

/// Parses an RFC 1123 Date header.
pub fn parse_date(value: &str) -> DateHeader {
    let timestamp: Option<SystemTime> = httpdate::parse_http_date(value.trim()).ok();
    DateHeader::new(value.trim(), timestamp)
}

/// Parses an Event header.
pub fn parse_event(value: &str) -> Option<EventHeader> {
    EventHeader::parse(value)
}

/// Maps compact header names to their canonical long form (RFC 3261 §7.3.3).
pub fn canonical_header_name(name: &str) -> SmolStr {
    if name.len() == 1 {
        let lower = name.to_ascii_lowercase();
        match COMPACT_FORMS.get(lower.as_str()) {
            Some(canonical) => SmolStr::new(*canonical),
            None => SmolStr::new(name),
        }
    } else {
        SmolStr::new(name)
    }
}
