// sipcell - The Sipcell SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The plugin hook chain.
//!
//! Plugins are resolved at startup into an ordered list of typed handlers.
//! Each hook either continues with (possibly rewritten) arguments or short
//! circuits with a reply. The chain is a fold: the first short circuit
//! wins and later plugins never run.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use smol_str::SmolStr;

use sipcell_core::SipMsg;
use sipcell_proxy::ProxyOpts;

use crate::{ports::TransportDest, router::SipReply};

/// Outcome of one hook invocation.
pub enum HookResult<T> {
    Continue(T),
    ShortCircuit(SipReply),
}

/// A compiled plugin. Every hook defaults to pass-through.
#[async_trait]
pub trait Plugin: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Rewrites proxy options before a request is forwarded.
    async fn proxy_opts(&self, request: &SipMsg, opts: ProxyOpts) -> HookResult<ProxyOpts> {
        let _ = request;
        HookResult::Continue(opts)
    }

    /// Rewrites locally originated requests before they hit the wire.
    async fn uac_headers(&self, request: SipMsg) -> HookResult<SipMsg> {
        HookResult::Continue(request)
    }

    /// Inspects/rewrites a REGISTER before the registrar sees it.
    async fn registrar_request(&self, request: SipMsg) -> HookResult<SipMsg> {
        HookResult::Continue(request)
    }

    /// Inspects/rewrites the registrar's response before it is sent.
    async fn registrar_reply(&self, response: SipMsg) -> HookResult<SipMsg> {
        HookResult::Continue(response)
    }

    /// Overrides the store index for an AOR (sharded backends).
    fn registrar_index(&self, aor: &str) -> Option<SmolStr> {
        let _ = aor;
        None
    }

    /// Observes bytes after a successful send.
    fn connection_sent(&self, dest: &TransportDest, payload: &Bytes) {
        let _ = (dest, payload);
    }

    /// Observes bytes as they arrive, before parsing.
    fn connection_recv(&self, origin: &TransportDest, payload: &Bytes) {
        let _ = (origin, payload);
    }
}

/// Ordered plugin list with fold helpers.
#[derive(Clone, Default)]
pub struct PluginChain {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginChain {
    pub fn new(plugins: Vec<Arc<dyn Plugin>>) -> Self {
        Self { plugins }
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    pub async fn fold_proxy_opts(
        &self,
        request: &SipMsg,
        mut opts: ProxyOpts,
    ) -> Result<ProxyOpts, SipReply> {
        for plugin in &self.plugins {
            match plugin.proxy_opts(request, opts).await {
                HookResult::Continue(next) => opts = next,
                HookResult::ShortCircuit(reply) => return Err(reply),
            }
        }
        Ok(opts)
    }

    pub async fn fold_uac_headers(&self, mut request: SipMsg) -> Result<SipMsg, SipReply> {
        for plugin in &self.plugins {
            match plugin.uac_headers(request).await {
                HookResult::Continue(next) => request = next,
                HookResult::ShortCircuit(reply) => return Err(reply),
            }
        }
        Ok(request)
    }

    pub async fn fold_registrar_request(&self, mut request: SipMsg) -> Result<SipMsg, SipReply> {
        for plugin in &self.plugins {
            match plugin.registrar_request(request).await {
                HookResult::Continue(next) => request = next,
                HookResult::ShortCircuit(reply) => return Err(reply),
            }
        }
        Ok(request)
    }

    pub async fn fold_registrar_reply(&self, mut response: SipMsg) -> Result<SipMsg, SipReply> {
        for plugin in &self.plugins {
            match plugin.registrar_reply(response).await {
                HookResult::Continue(next) => response = next,
                HookResult::ShortCircuit(reply) => return Err(reply),
            }
        }
        Ok(response)
    }

    /// First plugin naming an index wins.
    pub fn registrar_index(&self, aor: &str) -> Option<SmolStr> {
        self.plugins.iter().find_map(|p| p.registrar_index(aor))
    }

    pub fn notify_sent(&self, dest: &TransportDest, payload: &Bytes) {
        for plugin in &self.plugins {
            plugin.connection_sent(dest, payload);
        }
    }

    pub fn notify_recv(&self, origin: &TransportDest, payload: &Bytes) {
        for plugin in &self.plugins {
            plugin.connection_recv(origin, payload);
        }
    }
}
