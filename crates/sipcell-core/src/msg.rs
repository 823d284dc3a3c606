// sipcell - The Sipcell SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The typed SIP message.
//!
//! [`SipMsg`] carries the headers every engine in the stack inspects as typed
//! fields (Call-ID, Via list, From/To, CSeq, routes, contacts, ...) and keeps
//! everything else verbatim in a residual [`Headers`] bag, in received order.

use bytes::Bytes;
use rand::{distributions::Alphanumeric, Rng};
use sha2::{Digest, Sha256};
use smol_str::SmolStr;

use crate::{
    contact::ContactValue,
    event::EventHeader,
    headers::Headers,
    method::Method,
    name_addr::NameAddr,
    token_list::TokenList,
    uri::Uri,
    via::ViaHeader,
};

/// CSeq header: sequence number plus method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CSeq {
    pub seq: u32,
    pub method: Method,
}

impl CSeq {
    pub fn new(seq: u32, method: Method) -> Self {
        Self { seq, method }
    }

    /// Parses `<number> <method>`; the number must fit in 32 bits.
    pub fn parse(input: &str) -> Option<Self> {
        let mut parts = input.split_whitespace();
        let seq = parts.next()?.parse::<u32>().ok()?;
        let method = Method::from_token(parts.next()?);
        if parts.next().is_some() {
            return None;
        }
        Some(Self { seq, method })
    }
}

impl std::fmt::Display for CSeq {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.seq, self.method.as_str())
    }
}

/// Start line of a message: request or response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MsgKind {
    Request { method: Method, uri: Uri },
    Response { code: u16, reason: SmolStr },
}

/// A parsed SIP message with typed core headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SipMsg {
    pub kind: MsgKind,
    pub call_id: SmolStr,
    /// Topmost Via first; never empty for a wire-parsed message.
    pub vias: Vec<ViaHeader>,
    pub from: NameAddr,
    pub to: NameAddr,
    pub cseq: CSeq,
    pub max_forwards: u32,
    /// Route set for the request, topmost first.
    pub routes: Vec<NameAddr>,
    /// Record-Route values in received order.
    pub record_routes: Vec<NameAddr>,
    pub contacts: Vec<ContactValue>,
    pub expires: Option<u32>,
    pub content_type: Option<SmolStr>,
    pub require: TokenList,
    pub supported: TokenList,
    pub event: Option<EventHeader>,
    pub body: Bytes,
    /// Headers the stack does not interpret, in received order.
    pub headers: Headers,
}

impl SipMsg {
    /// Builds a minimal request. Callers fill routes/contacts/body as needed.
    pub fn new_request(
        method: Method,
        uri: Uri,
        call_id: impl Into<SmolStr>,
        from: NameAddr,
        to: NameAddr,
        cseq: u32,
    ) -> Self {
        Self {
            cseq: CSeq::new(cseq, method.clone()),
            kind: MsgKind::Request { method, uri },
            call_id: call_id.into(),
            vias: Vec::new(),
            from,
            to,
            max_forwards: DEFAULT_MAX_FORWARDS,
            routes: Vec::new(),
            record_routes: Vec::new(),
            contacts: Vec::new(),
            expires: None,
            content_type: None,
            require: TokenList::default(),
            supported: TokenList::default(),
            event: None,
            body: Bytes::new(),
            headers: Headers::new(),
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(self.kind, MsgKind::Request { .. })
    }

    pub fn is_response(&self) -> bool {
        !self.is_request()
    }

    /// Request method, or the CSeq method for responses.
    pub fn method(&self) -> &Method {
        match &self.kind {
            MsgKind::Request { method, .. } => method,
            MsgKind::Response { .. } => &self.cseq.method,
        }
    }

    /// Response status code; None for requests.
    pub fn code(&self) -> Option<u16> {
        match &self.kind {
            MsgKind::Response { code, .. } => Some(*code),
            MsgKind::Request { .. } => None,
        }
    }

    /// Request-URI; None for responses.
    pub fn request_uri(&self) -> Option<&Uri> {
        match &self.kind {
            MsgKind::Request { uri, .. } => Some(uri),
            MsgKind::Response { .. } => None,
        }
    }

    pub fn is_provisional(&self) -> bool {
        matches!(self.code(), Some(code) if (100..200).contains(&code))
    }

    pub fn is_final(&self) -> bool {
        matches!(self.code(), Some(code) if code >= 200)
    }

    pub fn is_success(&self) -> bool {
        matches!(self.code(), Some(code) if (200..300).contains(&code))
    }

    /// Topmost Via, present on every wire-parsed message.
    pub fn top_via(&self) -> Option<&ViaHeader> {
        self.vias.first()
    }

    /// Branch of the topmost Via.
    pub fn top_branch(&self) -> Option<&SmolStr> {
        self.top_via().and_then(|via| via.branch())
    }

    pub fn from_tag(&self) -> Option<&SmolStr> {
        self.from.tag()
    }

    pub fn to_tag(&self) -> Option<&SmolStr> {
        self.to.tag()
    }

    /// Deterministic message id: a hash over the message class and Call-ID.
    ///
    /// Requests and responses for the same call share the Call-ID component
    /// but not the class byte, so the two spaces never collide.
    pub fn id(&self) -> u64 {
        let class: u8 = if self.is_request() { b'R' } else { b'S' };
        let mut hasher = Sha256::new();
        hasher.update([class]);
        hasher.update(self.call_id.as_bytes());
        let digest = hasher.finalize();
        u64::from_be_bytes(digest[..8].try_into().unwrap_or_default())
    }

    /// Builds a response to this request with the canonical reason phrase.
    ///
    /// Copies Via chain, From, To, Call-ID, and CSeq per RFC 3261 §8.2.6.2.
    /// Panics in debug builds if called on a response.
    pub fn reply(&self, code: u16) -> SipMsg {
        self.reply_with_reason(code, default_reason(code))
    }

    /// Builds a response with an explicit reason phrase.
    pub fn reply_with_reason(&self, code: u16, reason: &str) -> SipMsg {
        debug_assert!(self.is_request(), "replies are built from requests");
        SipMsg {
            kind: MsgKind::Response {
                code,
                reason: SmolStr::new(reason),
            },
            call_id: self.call_id.clone(),
            vias: self.vias.clone(),
            from: self.from.clone(),
            to: self.to.clone(),
            cseq: self.cseq.clone(),
            max_forwards: DEFAULT_MAX_FORWARDS,
            routes: Vec::new(),
            record_routes: if code != 100 {
                self.record_routes.clone()
            } else {
                Vec::new()
            },
            contacts: Vec::new(),
            expires: None,
            content_type: None,
            require: TokenList::default(),
            supported: TokenList::default(),
            event: self.event.clone(),
            body: Bytes::new(),
            headers: Headers::new(),
        }
    }

    /// Like [`SipMsg::reply`] but guarantees a To tag, minting one when the
    /// request carried none (dialog-creating responses).
    pub fn reply_tagged(&self, code: u16, local_tag: &SmolStr) -> SipMsg {
        let mut response = self.reply(code);
        if response.to.tag().is_none() {
            response.to.set_tag(local_tag.clone());
        }
        response
    }
}

/// Builds the ACK for a non-2xx final response per RFC 3261 §17.1.1.3.
///
/// The ACK reuses the INVITE's Request-URI, Call-ID, From, top Via, and CSeq
/// number; the To mirrors the response (including its tag).
pub fn ack_for(invite: &SipMsg, response: &SipMsg) -> Option<SipMsg> {
    let uri = invite.request_uri()?.clone();
    let mut ack = SipMsg::new_request(
        Method::Ack,
        uri,
        invite.call_id.clone(),
        invite.from.clone(),
        response.to.clone(),
        invite.cseq.seq,
    );
    ack.vias = invite.top_via().cloned().into_iter().collect();
    ack.routes = invite.routes.clone();
    ack.max_forwards = invite.max_forwards;
    Some(ack)
}

/// Default Max-Forwards when the header is absent (RFC 3261 §8.1.1.6).
pub const DEFAULT_MAX_FORWARDS: u32 = 70;

/// Generates a tag parameter value (From/To tags).
pub fn generate_tag() -> SmolStr {
    random_token(9)
}

/// Generates a Call-ID localized to the given host.
pub fn generate_call_id(host: &str) -> SmolStr {
    SmolStr::new(format!("{}@{}", random_token(20), host))
}

pub(crate) fn random_token(len: usize) -> SmolStr {
    let mut rng = rand::thread_rng();
    let token: String = (&mut rng)
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect();
    SmolStr::new(token)
}

/// Canonical reason phrase for a status code (RFC 3261 §21 and extensions).
pub fn default_reason(code: u16) -> &'static str {
    match code {
        100 => "Trying",
        180 => "Ringing",
        181 => "Call Is Being Forwarded",
        182 => "Queued",
        183 => "Session Progress",
        200 => "OK",
        202 => "Accepted",
        300 => "Multiple Choices",
        301 => "Moved Permanently",
        302 => "Moved Temporarily",
        305 => "Use Proxy",
        380 => "Alternative Service",
        400 => "Bad Request",
        401 => "Unauthorized",
        402 => "Payment Required",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        407 => "Proxy Authentication Required",
        408 => "Request Timeout",
        410 => "Gone",
        413 => "Request Entity Too Large",
        414 => "Request-URI Too Long",
        415 => "Unsupported Media Type",
        416 => "Unsupported URI Scheme",
        420 => "Bad Extension",
        421 => "Extension Required",
        423 => "Interval Too Brief",
        439 => "First Hop Lacks Outbound Support",
        480 => "Temporarily Unavailable",
        481 => "Call/Transaction Does Not Exist",
        482 => "Loop Detected",
        483 => "Too Many Hops",
        484 => "Address Incomplete",
        485 => "Ambiguous",
        486 => "Busy Here",
        487 => "Request Terminated",
        488 => "Not Acceptable Here",
        489 => "Bad Event",
        491 => "Request Pending",
        493 => "Undecipherable",
        500 => "Server Internal Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Server Time-out",
        505 => "Version Not Supported",
        513 => "Message Too Large",
        600 => "Busy Everywhere",
        603 => "Decline",
        604 => "Does Not Exist Anywhere",
        606 => "Not Acceptable",
        _ => "Unknown",
    }
}
