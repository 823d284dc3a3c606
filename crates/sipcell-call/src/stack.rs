// sipcell - The Sipcell SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The stack front door: bytes in, cells spawned, messages dispatched by
//! Call-ID.

use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use smol_str::SmolStr;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use sipcell_core::SipMsg;
use sipcell_parse::{parse_message, ParseOutcome};
use sipcell_proxy::ProxyIdentity;
use sipcell_registrar::{Authenticator, MemoryRegStore, RegStore, Registrar, RegistrarConfig};
use sipcell_transaction::TimerDefaults;

use crate::{
    cell::{CallCell, CellMsg},
    config::StackConfig,
    plugin::PluginChain,
    ports::{Transport, TransportDest},
    router::Application,
};

pub(crate) struct StackInner {
    pub(crate) config: StackConfig,
    pub(crate) timer_defaults: TimerDefaults,
    pub(crate) identity: ProxyIdentity,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) app: Arc<dyn Application>,
    pub(crate) registrar: Arc<Registrar<Box<dyn RegStore>>>,
    pub(crate) plugins: PluginChain,
    pub(crate) cells: DashMap<SmolStr, mpsc::Sender<CellMsg>>,
}

pub(crate) type Shared = Arc<StackInner>;

/// What happened to a delivered buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecvOutcome {
    /// A message was routed into a call cell.
    Dispatched,
    /// Stream framing needs more bytes; the transport should keep buffering.
    NeedMoreBytes,
    /// Malformed request on a stream transport: a canned 400 went back.
    RepliedBadRequest,
    /// Nothing usable; the buffer was dropped.
    Dropped,
}

/// The assembled message-processing core.
///
/// Owns the cell table; everything else arrives through the constructor as
/// ports.
#[derive(Clone)]
pub struct SipStack {
    inner: Shared,
}

impl SipStack {
    /// Builds a stack from its ports. Configuration is validated here:
    /// startup is the only place a bad option can surface.
    pub fn new(
        config: StackConfig,
        transport: Arc<dyn Transport>,
        app: Arc<dyn Application>,
        plugins: PluginChain,
        store: Box<dyn RegStore>,
        authenticator: Option<Arc<dyn Authenticator>>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let registrar_config = RegistrarConfig {
            default_expires: config.registrar_default_expires,
            ..RegistrarConfig::default()
        };
        let registrar = Arc::new(Registrar::new(store, authenticator, registrar_config));
        // detached; the sweep task lives as long as the runtime
        let _ = Registrar::spawn_sweeper(registrar.clone());

        let identity = ProxyIdentity::new(
            config.local_host(),
            config.sip_local_port,
            config
                .sip_listen
                .first()
                .and_then(|listen| listen.kind())
                .unwrap_or(sipcell_core::TransportKind::Udp),
        );
        let inner = Arc::new(StackInner {
            timer_defaults: config.timer_defaults(),
            identity,
            config,
            transport,
            app,
            registrar,
            plugins,
            cells: DashMap::new(),
        });
        info!(host = %inner.identity.host, "sip stack ready");
        Ok(Self { inner })
    }

    /// A convenience constructor with the in-memory store.
    pub fn with_memory_store(
        config: StackConfig,
        transport: Arc<dyn Transport>,
        app: Arc<dyn Application>,
    ) -> anyhow::Result<Self> {
        Self::new(
            config,
            transport,
            app,
            PluginChain::default(),
            Box::new(MemoryRegStore::new()),
            None,
        )
    }

    /// The registrar, for application-level lookups (`find`, `find_gruu`).
    pub fn registrar(&self) -> &Arc<Registrar<Box<dyn RegStore>>> {
        &self.inner.registrar
    }

    /// Live call cell count.
    pub fn cell_count(&self) -> usize {
        self.inner.cells.len()
    }

    /// Entry point for the transport: a buffer arrived from `origin`.
    pub async fn on_recv(&self, payload: Bytes, origin: TransportDest) -> RecvOutcome {
        if self.inner.config.sip_debug {
            debug!(%origin, bytes = payload.len(), "recv");
        }
        self.inner.plugins.notify_recv(&origin, &payload);
        match parse_message(&payload, origin.transport) {
            ParseOutcome::Complete(msg, _rest) => self.dispatch(*msg, origin).await,
            ParseOutcome::Partial => RecvOutcome::NeedMoreBytes,
            ParseOutcome::ReplyError { reason, reply } => {
                if origin.transport.is_stream() {
                    debug!(%origin, %reason, "malformed request, answering 400");
                    if let Err(error) = self.inner.transport.send(&origin, reply).await {
                        warn!(%origin, %error, "could not send 400");
                    }
                    RecvOutcome::RepliedBadRequest
                } else {
                    debug!(%origin, %reason, "malformed datagram dropped");
                    RecvOutcome::Dropped
                }
            }
            ParseOutcome::Error(reason) => {
                debug!(%origin, %reason, "unparseable buffer dropped");
                RecvOutcome::Dropped
            }
        }
    }

    /// Routes a parsed message to its call cell, spawning one for new
    /// requests.
    async fn dispatch(&self, mut msg: SipMsg, origin: TransportDest) -> RecvOutcome {
        let call_id = msg.call_id.clone();
        let is_request = msg.is_request();

        // RFC 3581 / RFC 3261 §18.2.1: note where the request really came
        // from so responses travel back symmetrically.
        if is_request {
            if let Some(via) = msg.vias.first_mut() {
                if via.wants_rport() || via.sent_by_host != origin.host {
                    via.stamp_source(&origin.host, origin.port);
                }
            }
        }

        let sender = match self.inner.cells.get(&call_id) {
            Some(entry) => Some(entry.clone()),
            None if is_request => Some(self.spawn_cell(&call_id)),
            None => None,
        };
        let Some(sender) = sender else {
            debug!(%call_id, "response for unknown call dropped");
            return RecvOutcome::Dropped;
        };

        let mut envelope = CellMsg::Incoming {
            msg: Box::new(msg),
            origin,
        };
        // The cell may have exited between lookup and send; requests get
        // one respawn.
        if let Err(failed) = sender.send(envelope).await {
            self.inner.cells.remove(&call_id);
            if !is_request {
                return RecvOutcome::Dropped;
            }
            envelope = failed.0;
            let sender = self.spawn_cell(&call_id);
            if sender.send(envelope).await.is_err() {
                warn!(%call_id, "call cell unavailable");
                return RecvOutcome::Dropped;
            }
        }
        RecvOutcome::Dispatched
    }

    fn spawn_cell(&self, call_id: &SmolStr) -> mpsc::Sender<CellMsg> {
        self.inner
            .cells
            .entry(call_id.clone())
            .or_insert_with(|| {
                debug!(%call_id, "spawning call cell");
                CallCell::spawn(call_id.clone(), self.inner.clone())
            })
            .clone()
    }

    /// Originates a request as UAC toward `dest`. The owning cell mints the
    /// branch (when absent), runs the plugin header hooks, and drives the
    /// client transaction; responses surface through
    /// [`Application::on_response`](crate::Application::on_response).
    pub async fn send_request(&self, msg: SipMsg, dest: TransportDest) -> anyhow::Result<()> {
        let call_id = msg.call_id.clone();
        let sender = match self.inner.cells.get(&call_id) {
            Some(entry) => entry.clone(),
            None => self.spawn_cell(&call_id),
        };
        sender
            .send(CellMsg::SendRequest {
                msg: Box::new(msg),
                dest,
            })
            .await
            .map_err(|_| anyhow::anyhow!("call cell unavailable"))
    }

    /// Asks every cell to stop. Cells drain (487 on ringing INVITEs) and
    /// unregister themselves.
    pub async fn shutdown(&self) {
        let senders: Vec<(SmolStr, mpsc::Sender<CellMsg>)> = self
            .inner
            .cells
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        for (call_id, sender) in senders {
            if sender.send(CellMsg::Shutdown).await.is_err() {
                self.inner.cells.remove(&call_id);
            }
        }
    }
}
