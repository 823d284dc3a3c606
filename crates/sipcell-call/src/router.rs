// sipcell - The Sipcell SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The application routing port.
//!
//! When a request arrives with no matching transaction the stack asks the
//! application what to do with it. The verdict set is closed: consume
//! locally, proxy (explicit targets or the Request-URI), or answer.

use async_trait::async_trait;
use bytes::Bytes;
use smol_str::SmolStr;

use sipcell_core::{generate_tag, Method, SipMsg, SipUri};
use sipcell_proxy::ProxyOpts;

/// Declarative response description returned by application callbacks.
#[derive(Debug, Clone)]
pub struct SipReply {
    pub code: u16,
    pub reason: Option<SmolStr>,
    pub headers: Vec<(SmolStr, SmolStr)>,
    pub body: Option<(SmolStr, Bytes)>,
}

impl SipReply {
    pub fn code(code: u16) -> Self {
        Self {
            code,
            reason: None,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<SmolStr>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<SmolStr>, value: impl Into<SmolStr>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, content_type: impl Into<SmolStr>, body: Bytes) -> Self {
        self.body = Some((content_type.into(), body));
        self
    }

    /// Materializes the response for a request, minting a To tag when the
    /// reply can form a dialog.
    pub fn build(&self, request: &SipMsg) -> SipMsg {
        let mut response = match &self.reason {
            Some(reason) => request.reply_with_reason(self.code, reason),
            None => request.reply(self.code),
        };
        if self.code > 100 && response.to.tag().is_none() {
            response.to.set_tag(generate_tag());
        }
        for (name, value) in &self.headers {
            response.headers.push(name.clone(), value.clone());
        }
        if let Some((content_type, body)) = &self.body {
            response.content_type = Some(content_type.clone());
            response.body = body.clone();
        }
        response
    }
}

/// What to do with an incoming out-of-dialog request.
#[derive(Debug, Clone)]
pub enum RouteVerdict {
    /// Consume locally through the UAS handler chain.
    Process,
    /// Statefully proxy to these targets, forking when more than one.
    ProxyTo {
        targets: Vec<SipUri>,
        opts: ProxyOpts,
    },
    /// Statefully proxy using the request's own Request-URI.
    ProxyRuri { opts: ProxyOpts },
    /// Respond immediately (a server transaction is created).
    Reply(SipReply),
    /// Respond without creating any server transaction state.
    ReplyStateless(SipReply),
}

/// The application behind the stack.
///
/// All callbacks have conservative defaults so an embedder only overrides
/// what it cares about.
#[async_trait]
pub trait Application: Send + Sync + 'static {
    /// Routing decision for an out-of-dialog request.
    async fn route(
        &self,
        scheme: &str,
        user: Option<&str>,
        domain: &str,
        request: &SipMsg,
    ) -> RouteVerdict {
        let _ = (scheme, user, domain, request);
        RouteVerdict::Process
    }

    /// UAS handler for requests consumed locally (the `Process` verdict and
    /// in-dialog requests the stack does not answer itself).
    async fn on_request(&self, request: &SipMsg) -> SipReply {
        default_uas_reply(request)
    }

    /// PUBLISH handler (RFC 3903). Default declines.
    async fn on_publish(&self, request: &SipMsg) -> SipReply {
        let _ = request;
        SipReply::code(501)
    }

    /// Observes responses delivered to locally originated requests.
    async fn on_response(&self, response: &SipMsg) {
        let _ = response;
    }
}

/// Method-appropriate default answer for a locally consumed request.
pub fn default_uas_reply(request: &SipMsg) -> SipReply {
    match request.method() {
        Method::Options => SipReply::code(200)
            .with_header("Allow", sipcell_core::method_allow_list()),
        Method::Message | Method::Info | Method::Update | Method::Prack | Method::Notify => {
            SipReply::code(200)
        }
        Method::Invite => SipReply::code(486),
        Method::Subscribe | Method::Refer => SipReply::code(489),
        _ => SipReply::code(501),
    }
}

/// Minimal application: routes everything to local processing with the
/// default replies. Used by tests and as a placeholder.
#[derive(Debug, Default)]
pub struct DefaultApplication;

#[async_trait]
impl Application for DefaultApplication {}
