// sipcell - The Sipcell SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! SIP wire parser and serializer.
//!
//! [`parse_message`] turns raw bytes into a typed [`SipMsg`], reporting one of
//! four outcomes: the message plus any trailing bytes, a request for more
//! bytes (stream transports), a malformed request with a canned 400 ready to
//! send, or an unrecoverable error.
//!
//! # Example
//! ```
//! use bytes::Bytes;
//! use sipcell_core::TransportKind;
//! use sipcell_parse::{parse_message, serialize_msg, ParseOutcome};
//! # let raw = b"OPTIONS sip:bob@example.com SIP/2.0\r\nVia: SIP/2.0/UDP pc33.example.com;branch=z9hG4bK776asdhds\r\nMax-Forwards: 70\r\nTo: <sip:bob@example.com>\r\nFrom: <sip:alice@example.com>;tag=1928301774\r\nCall-ID: a84b4c76e66710@pc33.example.com\r\nCSeq: 314159 OPTIONS\r\nContent-Length: 0\r\n\r\n";
//! let ParseOutcome::Complete(msg, rest) = parse_message(&Bytes::from_static(raw), TransportKind::Udp) else {
//!     panic!("parse failed");
//! };
//! assert!(rest.is_empty());
//! let _wire = serialize_msg(&msg);
//! ```

use bytes::{Bytes, BytesMut};
use smol_str::SmolStr;

use sipcell_core::{
    CSeq, EventHeader, Headers, Method, MsgKind, NameAddr, SipMsg, TokenList, TransportKind, Uri,
    DEFAULT_MAX_FORWARDS,
};

mod header_values;

pub use header_values::{
    canonical_header_name, parse_contact_values, parse_date, parse_event, parse_integer_list,
    parse_name_addr_values, parse_token_list, parse_via_values, split_header_values,
};

/// Upper bound on a single message, head and body included.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Max-Forwards values at or above this bound are malformed.
const MAX_FORWARDS_BOUND: u32 = 300;

/// Result of feeding bytes to the parser.
#[derive(Debug, Clone)]
pub enum ParseOutcome {
    /// A full message plus whatever bytes trailed it (stream pipelining).
    Complete(Box<SipMsg>, Bytes),
    /// More bytes are required. Only meaningful on stream transports.
    Partial,
    /// A syntactically broken request for which a 400 could be built.
    ReplyError { reason: SmolStr, reply: Bytes },
    /// Unparseable input with no reply possible (or a broken response).
    Error(SmolStr),
}

/// Parses one SIP message from `buf` as received over `transport`.
///
/// Framing rules:
/// - Stream transports require a valid `Content-Length`; a missing or
///   non-numeric value is malformed.
/// - On datagram transports a missing `Content-Length` means the body is the
///   remainder of the datagram.
pub fn parse_message(buf: &Bytes, transport: TransportKind) -> ParseOutcome {
    let data = buf.as_ref();

    // CRLF keep-alives between messages on stream transports.
    let mut offset = 0;
    while data[offset..].starts_with(b"\r\n") {
        offset += 2;
    }
    let data = &data[offset..];

    if data.is_empty() {
        return if transport.is_stream() {
            ParseOutcome::Partial
        } else {
            ParseOutcome::Error(SmolStr::new("empty datagram"))
        };
    }
    if data.len() > MAX_MESSAGE_SIZE {
        return ParseOutcome::Error(SmolStr::new("message exceeds size limit"));
    }

    let head_end = match find_head_end(data) {
        Some(pos) => pos,
        None if transport.is_stream() => return ParseOutcome::Partial,
        None => return ParseOutcome::Error(SmolStr::new("truncated header section")),
    };

    let head = match std::str::from_utf8(&data[..head_end]) {
        Ok(head) => head,
        Err(_) => return ParseOutcome::Error(SmolStr::new("header section is not UTF-8")),
    };
    let body_bytes = &data[head_end + 4..];

    let mut lines = head.split("\r\n");
    let first = match lines.next() {
        Some(line) if !line.trim().is_empty() => line.trim(),
        _ => return ParseOutcome::Error(SmolStr::new("empty start line")),
    };

    let start = match parse_start_line(first) {
        Some(start) => start,
        None => return ParseOutcome::Error(SmolStr::new("invalid start line")),
    };

    let raw_headers = match parse_header_lines(lines) {
        Some(headers) => headers,
        None => {
            return malformed(&start, Headers::new(), "invalid header line");
        }
    };

    // Body framing.
    let declared = match content_length(&raw_headers, transport) {
        Ok(declared) => declared,
        Err(reason) => return malformed(&start, raw_headers, reason),
    };
    let (body, consumed) = match declared {
        Some(declared) => {
            if declared > body_bytes.len() {
                if transport.is_stream() {
                    return ParseOutcome::Partial;
                }
                return malformed(&start, raw_headers, "Content-Length exceeds datagram");
            }
            (
                Bytes::copy_from_slice(&body_bytes[..declared]),
                offset + head_end + 4 + declared,
            )
        }
        // Datagram with no Content-Length: body is the rest of the datagram.
        None => (Bytes::copy_from_slice(body_bytes), buf.len()),
    };
    let remaining = buf.slice(consumed.min(buf.len())..);

    match build_msg(start, raw_headers, body) {
        Ok(msg) => ParseOutcome::Complete(Box::new(msg), remaining),
        Err(outcome) => outcome,
    }
}

enum StartLine {
    Request { method: Method, uri_token: SmolStr },
    Response { code: u16, reason: SmolStr },
}

impl StartLine {
    fn is_request(&self) -> bool {
        matches!(self, StartLine::Request { .. })
    }
}

/// Parses a request-line or status-line using nom.
fn parse_start_line(line: &str) -> Option<StartLine> {
    use nom::{
        bytes::complete::{tag, take_while1},
        character::complete::{space1, u16 as nom_u16},
        combinator::rest,
        sequence::tuple,
    };

    if line.starts_with("SIP/2.0") {
        let mut parser = tuple((
            tag::<_, _, nom::error::Error<_>>("SIP/2.0"),
            space1::<_, nom::error::Error<_>>,
            nom_u16::<_, nom::error::Error<_>>,
            // the reason phrase may be empty
            rest::<_, nom::error::Error<_>>,
        ));
        let (_, (_, _, code, reason)) = parser(line).ok()?;
        if !(100..700).contains(&code) {
            return None;
        }
        return Some(StartLine::Response {
            code,
            reason: SmolStr::new(reason.trim()),
        });
    }

    let mut parser = tuple((
        take_while1::<_, _, nom::error::Error<_>>(is_token_char),
        space1::<_, nom::error::Error<_>>,
        take_while1::<_, _, nom::error::Error<_>>(|c: char| !c.is_whitespace()),
        space1::<_, nom::error::Error<_>>,
        rest::<_, nom::error::Error<_>>,
    ));
    let (_, (method_token, _, uri_token, _, version)) = parser(line).ok()?;
    if version.trim() != "SIP/2.0" {
        return None;
    }
    Some(StartLine::Request {
        method: Method::from_token(method_token),
        uri_token: SmolStr::new(uri_token),
    })
}

/// Parses header lines, rejecting folded continuations (RFC 3261 §7.3.1).
fn parse_header_lines<'a, I>(lines: I) -> Option<Headers>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut headers = Headers::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            return None;
        }
        let (name, value) = line.split_once(':')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        headers.push(canonical_header_name(name), value.trim());
    }
    Some(headers)
}

/// Resolves the declared Content-Length for the transport.
fn content_length(
    headers: &Headers,
    transport: TransportKind,
) -> Result<Option<usize>, &'static str> {
    let values: Vec<&SmolStr> = headers.get_all("Content-Length").collect();
    if values.is_empty() {
        return if transport.is_stream() {
            Err("missing Content-Length")
        } else {
            Ok(None)
        };
    }
    let mut declared: Option<usize> = None;
    for value in values {
        let parsed = value
            .trim()
            .parse::<usize>()
            .map_err(|_| "invalid Content-Length")?;
        if parsed > MAX_MESSAGE_SIZE {
            return Err("Content-Length exceeds size limit");
        }
        match declared {
            Some(existing) if existing != parsed => return Err("conflicting Content-Length"),
            _ => declared = Some(parsed),
        }
    }
    Ok(declared)
}

/// Lifts the raw header bag into the typed message, consuming known headers
/// and leaving the rest residual.
fn build_msg(start: StartLine, raw: Headers, body: Bytes) -> Result<SipMsg, ParseOutcome> {
    let is_request = start.is_request();
    let fail = |reason: &str, raw: &Headers| -> ParseOutcome {
        if is_request {
            reply_error(reason, raw)
        } else {
            ParseOutcome::Error(SmolStr::new(reason))
        }
    };

    macro_rules! required_single {
        ($name:literal) => {{
            match raw.count($name) {
                0 => return Err(fail(concat!("missing ", $name), &raw)),
                1 => raw.get($name).cloned().unwrap_or_default(),
                _ => return Err(fail(concat!("duplicated ", $name), &raw)),
            }
        }};
    }

    let call_id = required_single!("Call-ID");
    if call_id.is_empty() {
        return Err(fail("missing Call-ID", &raw));
    }

    let from_raw = required_single!("From");
    let from = NameAddr::parse(&from_raw).ok_or_else(|| fail("invalid From", &raw))?;
    let to_raw = required_single!("To");
    let to = NameAddr::parse(&to_raw).ok_or_else(|| fail("invalid To", &raw))?;

    let cseq_raw = required_single!("CSeq");
    let cseq = CSeq::parse(&cseq_raw).ok_or_else(|| fail("invalid CSeq", &raw))?;

    let mut vias = Vec::new();
    for value in raw.get_all("Via") {
        match parse_via_values(value) {
            Some(parsed) => vias.extend(parsed),
            None => return Err(fail("invalid Via", &raw)),
        }
    }
    if vias.is_empty() {
        return Err(fail("missing Via", &raw));
    }

    // Max-Forwards only has meaning on requests.
    let max_forwards = match raw.get("Max-Forwards").filter(|_| is_request) {
        None => DEFAULT_MAX_FORWARDS,
        Some(value) => match value.trim().parse::<u32>() {
            Ok(parsed) if parsed < MAX_FORWARDS_BOUND => parsed,
            _ => return Err(fail("invalid Max-Forwards", &raw)),
        },
    };

    let kind = match start {
        StartLine::Request { method, uri_token } => {
            let uri =
                Uri::parse(&uri_token).ok_or_else(|| fail("invalid Request-URI", &raw))?;
            if cseq.method != method {
                return Err(fail("invalid CSeq", &raw));
            }
            MsgKind::Request { method, uri }
        }
        StartLine::Response { code, reason } => MsgKind::Response { code, reason },
    };

    let mut routes = Vec::new();
    for value in raw.get_all("Route") {
        match parse_name_addr_values(value) {
            Some(parsed) => routes.extend(parsed),
            None => return Err(fail("invalid Route", &raw)),
        }
    }
    let mut record_routes = Vec::new();
    for value in raw.get_all("Record-Route") {
        match parse_name_addr_values(value) {
            Some(parsed) => record_routes.extend(parsed),
            None => return Err(fail("invalid Record-Route", &raw)),
        }
    }
    let mut contacts = Vec::new();
    for value in raw.get_all("Contact") {
        match parse_contact_values(value) {
            Some(parsed) => contacts.extend(parsed),
            None => return Err(fail("invalid Contact", &raw)),
        }
    }

    let expires = raw
        .get("Expires")
        .and_then(|value| value.trim().parse::<u32>().ok());
    let content_type = raw.get("Content-Type").cloned();
    let event = match raw.get("Event") {
        Some(value) => Some(EventHeader::parse(value).ok_or_else(|| fail("invalid Event", &raw))?),
        None => None,
    };

    let mut require = TokenList::default();
    for value in raw.get_all("Require") {
        for token in TokenList::parse(value).0 {
            require.add(&token);
        }
    }
    let mut supported = TokenList::default();
    for value in raw.get_all("Supported") {
        for token in TokenList::parse(value).0 {
            supported.add(&token);
        }
    }

    let residual = Headers::from_vec(
        raw.into_inner()
            .into_iter()
            .filter(|h| !is_typed_header(&h.name))
            .collect(),
    );

    Ok(SipMsg {
        kind,
        call_id,
        vias,
        from,
        to,
        cseq,
        max_forwards,
        routes,
        record_routes,
        contacts,
        expires,
        content_type,
        require,
        supported,
        event,
        body,
        headers: residual,
    })
}

fn is_typed_header(name: &str) -> bool {
    const TYPED: &[&str] = &[
        "Via",
        "From",
        "To",
        "Call-ID",
        "CSeq",
        "Max-Forwards",
        "Route",
        "Record-Route",
        "Contact",
        "Expires",
        "Content-Type",
        "Content-Length",
        "Require",
        "Supported",
        "Event",
    ];
    TYPED.iter().any(|t| t.eq_ignore_ascii_case(name))
}

fn malformed(start: &StartLine, raw: Headers, reason: &str) -> ParseOutcome {
    if start.is_request() {
        reply_error(reason, &raw)
    } else {
        ParseOutcome::Error(SmolStr::new(reason))
    }
}

/// Builds the canned 400 for a malformed request, echoing whatever
/// transaction-identifying headers survived.
fn reply_error(reason: &str, raw: &Headers) -> ParseOutcome {
    let mut out = String::new();
    out.push_str("SIP/2.0 400 Bad Request");
    if !reason.is_empty() {
        out.push_str(" (");
        out.push_str(reason);
        out.push(')');
    }
    out.push_str("\r\n");
    for name in ["Via", "From", "To", "Call-ID", "CSeq"] {
        for value in raw.get_all(name) {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
    }
    out.push_str("Content-Length: 0\r\n\r\n");
    ParseOutcome::ReplyError {
        reason: SmolStr::new(reason),
        reply: Bytes::from(out),
    }
}

/// Serializes a message to its wire form with a normalized Content-Length.
pub fn serialize_msg(msg: &SipMsg) -> Bytes {
    use std::fmt::Write;

    let mut buf = String::new();
    match &msg.kind {
        MsgKind::Request { method, uri } => {
            let _ = write!(buf, "{} {} SIP/2.0\r\n", method.as_str(), uri);
        }
        MsgKind::Response { code, reason } => {
            let _ = write!(buf, "SIP/2.0 {} {}\r\n", code, reason);
        }
    }

    for via in &msg.vias {
        let _ = write!(buf, "Via: {}\r\n", via);
    }
    let _ = write!(buf, "From: {}\r\n", msg.from);
    let _ = write!(buf, "To: {}\r\n", msg.to);
    let _ = write!(buf, "Call-ID: {}\r\n", msg.call_id);
    let _ = write!(buf, "CSeq: {}\r\n", msg.cseq);
    if msg.is_request() {
        let _ = write!(buf, "Max-Forwards: {}\r\n", msg.max_forwards);
    }
    for route in &msg.routes {
        let _ = write!(buf, "Route: {}\r\n", route);
    }
    for record_route in &msg.record_routes {
        let _ = write!(buf, "Record-Route: {}\r\n", record_route);
    }
    for contact in &msg.contacts {
        let _ = write!(buf, "Contact: {}\r\n", contact);
    }
    if let Some(expires) = msg.expires {
        let _ = write!(buf, "Expires: {}\r\n", expires);
    }
    if let Some(event) = &msg.event {
        let _ = write!(buf, "Event: {}\r\n", event);
    }
    if !msg.require.is_empty() {
        let _ = write!(buf, "Require: {}\r\n", msg.require);
    }
    if !msg.supported.is_empty() {
        let _ = write!(buf, "Supported: {}\r\n", msg.supported);
    }
    if let Some(content_type) = &msg.content_type {
        let _ = write!(buf, "Content-Type: {}\r\n", content_type);
    }
    for header in msg.headers.iter() {
        let _ = write!(buf, "{}: {}\r\n", header.name, header.value);
    }
    let _ = write!(buf, "Content-Length: {}\r\n", msg.body.len());
    buf.push_str("\r\n");

    let mut out = BytesMut::with_capacity(buf.len() + msg.body.len());
    out.extend_from_slice(buf.as_bytes());
    out.extend_from_slice(msg.body.as_ref());
    out.freeze()
}

/// Locates the `\r\n\r\n` separating headers from the body.
fn find_head_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|window| window == b"\r\n\r\n")
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(
            c,
            '!' | '#' | '$' | '%' | '&' | '\'' | '*' | '+' | '-' | '.' | '^' | '_' | '`' | '|' | '~'
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_invite_bytes() -> Bytes {
        Bytes::from_static(
            b"INVITE sip:bob@example.com SIP/2.0\r\n\
Via: SIP/2.0/UDP pc33.example.com;branch=z9hG4bK776asdhds\r\n\
Max-Forwards: 70\r\n\
To: Bob <sip:bob@example.com>\r\n\
From: Alice <sip:alice@example.com>;tag=1928301774\r\n\
Call-ID: a84b4c76e66710@pc33.example.com\r\n\
CSeq: 314159 INVITE\r\n\
Contact: <sip:alice@pc33.example.com>\r\n\
Subject: lunch\r\n\
Content-Length: 0\r\n\r\n",
        )
    }

    fn expect_complete(outcome: ParseOutcome) -> (SipMsg, Bytes) {
        match outcome {
            ParseOutcome::Complete(msg, rest) => (*msg, rest),
            other => panic!("expected Complete, got {other:?}"),
        }
    }

    fn expect_reply_error(outcome: ParseOutcome) -> (SmolStr, Bytes) {
        match outcome {
            ParseOutcome::ReplyError { reason, reply } => (reason, reply),
            other => panic!("expected ReplyError, got {other:?}"),
        }
    }

    #[test]
    fn parses_basic_invite() {
        let (msg, rest) = expect_complete(parse_message(&sample_invite_bytes(), TransportKind::Udp));
        assert!(rest.is_empty());
        assert_eq!(msg.method(), &Method::Invite);
        assert_eq!(msg.call_id.as_str(), "a84b4c76e66710@pc33.example.com");
        assert_eq!(msg.cseq.seq, 314159);
        assert_eq!(msg.vias.len(), 1);
        assert_eq!(msg.from_tag().unwrap().as_str(), "1928301774");
        assert_eq!(msg.contacts.len(), 1);
        // Subject stays residual
        assert_eq!(msg.headers.get("Subject").unwrap().as_str(), "lunch");
    }

    #[test]
    fn round_trip_preserves_typed_fields() {
        let (msg, _) = expect_complete(parse_message(&sample_invite_bytes(), TransportKind::Udp));
        let wire = serialize_msg(&msg);
        let (reparsed, _) = expect_complete(parse_message(&wire, TransportKind::Udp));
        assert_eq!(msg, reparsed);
    }

    #[test]
    fn cseq_method_mismatch_is_rejected() {
        let raw = Bytes::from_static(
            b"INVITE sip:bob@example.com SIP/2.0\r\n\
Via: SIP/2.0/UDP host;branch=z9hG4bKx\r\n\
To: <sip:bob@example.com>\r\n\
From: <sip:alice@example.com>;tag=1\r\n\
Call-ID: abc\r\n\
CSeq: 5 REGISTER\r\n\r\n",
        );
        let (reason, reply) = expect_reply_error(parse_message(&raw, TransportKind::Udp));
        assert_eq!(reason.as_str(), "invalid CSeq");
        let text = std::str::from_utf8(&reply).unwrap();
        assert!(text.starts_with("SIP/2.0 400 Bad Request"));
        assert!(text.contains("Call-ID: abc\r\n"));
    }

    #[test]
    fn duplicate_core_headers_are_rejected() {
        let raw = Bytes::from_static(
            b"OPTIONS sip:x@example.com SIP/2.0\r\n\
Via: SIP/2.0/UDP host;branch=z9hG4bKx\r\n\
To: <sip:x@example.com>\r\n\
To: <sip:y@example.com>\r\n\
From: <sip:a@example.com>;tag=1\r\n\
Call-ID: abc\r\n\
CSeq: 1 OPTIONS\r\n\r\n",
        );
        let (reason, _) = expect_reply_error(parse_message(&raw, TransportKind::Udp));
        assert_eq!(reason.as_str(), "duplicated To");
    }

    #[test]
    fn missing_via_is_rejected() {
        let raw = Bytes::from_static(
            b"OPTIONS sip:x@example.com SIP/2.0\r\n\
To: <sip:x@example.com>\r\n\
From: <sip:a@example.com>;tag=1\r\n\
Call-ID: abc\r\n\
CSeq: 1 OPTIONS\r\n\r\n",
        );
        let (reason, _) = expect_reply_error(parse_message(&raw, TransportKind::Udp));
        assert_eq!(reason.as_str(), "missing Via");
    }

    #[test]
    fn stream_requires_content_length() {
        let raw = Bytes::from_static(
            b"OPTIONS sip:x@example.com SIP/2.0\r\n\
Via: SIP/2.0/TCP host;branch=z9hG4bKx\r\n\
To: <sip:x@example.com>\r\n\
From: <sip:a@example.com>;tag=1\r\n\
Call-ID: abc\r\n\
CSeq: 1 OPTIONS\r\n\r\n",
        );
        let (reason, _) = expect_reply_error(parse_message(&raw, TransportKind::Tcp));
        assert_eq!(reason.as_str(), "missing Content-Length");
        // the same message is fine over UDP
        let (msg, _) = expect_complete(parse_message(&raw, TransportKind::Udp));
        assert!(msg.body.is_empty());
    }

    #[test]
    fn stream_partial_until_body_arrives() {
        let raw = Bytes::from_static(
            b"MESSAGE sip:x@example.com SIP/2.0\r\n\
Via: SIP/2.0/TCP host;branch=z9hG4bKx\r\n\
To: <sip:x@example.com>\r\n\
From: <sip:a@example.com>;tag=1\r\n\
Call-ID: abc\r\n\
CSeq: 1 MESSAGE\r\n\
Content-Type: text/plain\r\n\
Content-Length: 5\r\n\r\nhel",
        );
        assert!(matches!(
            parse_message(&raw, TransportKind::Tcp),
            ParseOutcome::Partial
        ));

        let mut full = raw.to_vec();
        full.extend_from_slice(b"lo!!extra");
        let (msg, rest) = expect_complete(parse_message(&Bytes::from(full), TransportKind::Tcp));
        assert_eq!(msg.body.as_ref(), b"hello");
        assert_eq!(rest.as_ref(), b"!!extra");
    }

    #[test]
    fn partial_header_section_on_stream() {
        let raw = Bytes::from_static(b"INVITE sip:bob@example.com SIP/2.0\r\nVia: SIP");
        assert!(matches!(
            parse_message(&raw, TransportKind::Tcp),
            ParseOutcome::Partial
        ));
        assert!(matches!(
            parse_message(&raw, TransportKind::Udp),
            ParseOutcome::Error(_)
        ));
    }

    #[test]
    fn datagram_body_is_rest_of_packet() {
        let raw = Bytes::from_static(
            b"MESSAGE sip:x@example.com SIP/2.0\r\n\
Via: SIP/2.0/UDP host;branch=z9hG4bKx\r\n\
To: <sip:x@example.com>\r\n\
From: <sip:a@example.com>;tag=1\r\n\
Call-ID: abc\r\n\
CSeq: 1 MESSAGE\r\n\r\nhello world",
        );
        let (msg, _) = expect_complete(parse_message(&raw, TransportKind::Udp));
        assert_eq!(msg.body.as_ref(), b"hello world");
    }

    #[test]
    fn folded_headers_are_rejected() {
        let raw = Bytes::from_static(
            b"OPTIONS sip:x@example.com SIP/2.0\r\n\
Via: SIP/2.0/UDP host;\r\n branch=z9hG4bKx\r\n\
To: <sip:x@example.com>\r\n\
From: <sip:a@example.com>;tag=1\r\n\
Call-ID: abc\r\n\
CSeq: 1 OPTIONS\r\n\r\n",
        );
        let (reason, _) = expect_reply_error(parse_message(&raw, TransportKind::Udp));
        assert_eq!(reason.as_str(), "invalid header line");
    }

    #[test]
    fn invalid_max_forwards_is_rejected() {
        let raw = Bytes::from_static(
            b"OPTIONS sip:x@example.com SIP/2.0\r\n\
Via: SIP/2.0/UDP host;branch=z9hG4bKx\r\n\
Max-Forwards: 300\r\n\
To: <sip:x@example.com>\r\n\
From: <sip:a@example.com>;tag=1\r\n\
Call-ID: abc\r\n\
CSeq: 1 OPTIONS\r\n\r\n",
        );
        let (reason, _) = expect_reply_error(parse_message(&raw, TransportKind::Udp));
        assert_eq!(reason.as_str(), "invalid Max-Forwards");
    }

    #[test]
    fn max_forwards_defaults_to_70() {
        let (msg, _) = expect_complete(parse_message(&sample_invite_bytes(), TransportKind::Udp));
        assert_eq!(msg.max_forwards, 70);
    }

    #[test]
    fn unknown_method_is_kept_verbatim() {
        let raw = Bytes::from_static(
            b"PING sip:x@example.com SIP/2.0\r\n\
Via: SIP/2.0/UDP host;branch=z9hG4bKx\r\n\
To: <sip:x@example.com>\r\n\
From: <sip:a@example.com>;tag=1\r\n\
Call-ID: abc\r\n\
CSeq: 1 PING\r\n\r\n",
        );
        let (msg, _) = expect_complete(parse_message(&raw, TransportKind::Udp));
        assert_eq!(msg.method().as_str(), "PING");
    }

    #[test]
    fn compact_forms_canonicalize() {
        let raw = Bytes::from_static(
            b"OPTIONS sip:x@example.com SIP/2.0\r\n\
v: SIP/2.0/UDP host;branch=z9hG4bKx\r\n\
t: <sip:x@example.com>\r\n\
f: <sip:a@example.com>;tag=1\r\n\
i: abc\r\n\
CSeq: 1 OPTIONS\r\n\
l: 0\r\n\r\n",
        );
        let (msg, _) = expect_complete(parse_message(&raw, TransportKind::Udp));
        assert_eq!(msg.call_id.as_str(), "abc");
        assert_eq!(msg.vias.len(), 1);
    }

    #[test]
    fn malformed_response_is_error_not_reply() {
        let raw = Bytes::from_static(
            b"SIP/2.0 200 OK\r\n\
Via: SIP/2.0/UDP host;branch=z9hG4bKx\r\n\
To: <sip:x@example.com>\r\n\
From: <sip:a@example.com>;tag=1\r\n\
CSeq: 1 OPTIONS\r\n\r\n",
        );
        // missing Call-ID
        assert!(matches!(
            parse_message(&raw, TransportKind::Udp),
            ParseOutcome::Error(_)
        ));
    }

    #[test]
    fn invalid_request_uri_is_rejected() {
        let raw = Bytes::from_static(
            b"INVITE bob SIP/2.0\r\n\
Via: SIP/2.0/UDP host;branch=z9hG4bKx\r\n\
To: <sip:x@example.com>\r\n\
From: <sip:a@example.com>;tag=1\r\n\
Call-ID: abc\r\n\
CSeq: 1 INVITE\r\n\r\n",
        );
        let (reason, _) = expect_reply_error(parse_message(&raw, TransportKind::Udp));
        assert_eq!(reason.as_str(), "invalid Request-URI");
    }

    #[test]
    fn leading_crlf_keepalives_are_skipped() {
        let mut data = b"\r\n\r\n".to_vec();
        data.extend_from_slice(&sample_invite_bytes());
        let (msg, _) = expect_complete(parse_message(&Bytes::from(data), TransportKind::Tcp));
        assert_eq!(msg.method(), &Method::Invite);
    }
}
