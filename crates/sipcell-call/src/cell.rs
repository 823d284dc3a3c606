// sipcell - The Sipcell SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The per-Call-ID cell.
//!
//! One cell owns every transaction, dialog, and proxy fork sharing a
//! Call-ID. All state transitions happen on the cell's task; the rest of
//! the stack talks to it through its mailbox, and timers are messages the
//! transaction set posts back into the same loop.
//!
//! Work is queued, not nested: state machines return action lists which
//! land on a queue, and [`CallCell::pump`] drains it one action at a time.
//! An action may enqueue follow-ups (a fork launch enqueues transaction
//! sends; a terminated leg enqueues aggregation feedback) without any
//! reentrancy.
//!
//! A cell exits once it has been idle (no transactions, dialogs, or forks)
//! for the configured linger, draining politely: still-proceeding INVITE
//! server transactions answer 487 on the way out.

use std::collections::{HashMap, VecDeque};

use smol_str::SmolStr;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use sipcell_core::{generate_tag, Method, SipMsg, SipUri, Uri, ViaHeader};
use sipcell_dialog::DialogSet;
use sipcell_parse::serialize_msg;
use sipcell_proxy::{
    detect_loop, prepare_forward, prepare_response_upstream, ForkAction, ForkMode, ForkState,
    ForwardError, ProxyOpts,
};
use sipcell_transaction::{
    fsm::{
        InviteClientFsm, InviteClientState, InviteServerFsm, NonInviteClientFsm,
        NonInviteServerFsm, TxnAction, TxnFsm,
    },
    generate_branch,
    store::TimerFire,
    TimerId, TransactionKey, TransactionLimits, TransactionSet, TransportTimers, TxnRole,
};

use crate::{
    ports::TransportDest,
    router::{RouteVerdict, SipReply},
    stack::Shared,
};

/// Mailbox messages a cell consumes.
pub enum CellMsg {
    Incoming {
        msg: Box<SipMsg>,
        origin: TransportDest,
    },
    /// The application's answer for a locally consumed request. Arrives as
    /// a message so slow answers never stall the cell (and a CANCEL that
    /// wins the race makes the late answer a no-op).
    AppReply {
        key: TransactionKey,
        reply: SipReply,
    },
    /// A request this stack originates as UAC.
    SendRequest {
        msg: Box<SipMsg>,
        dest: TransportDest,
    },
    Shutdown,
}

/// Unit of queued work.
enum Work {
    Txn(TransactionKey, TxnAction),
    Fork(TransactionKey, ForkAction),
}

struct ForkCtx {
    fork: ForkState,
    opts: ProxyOpts,
}

pub(crate) struct CallCell {
    call_id: SmolStr,
    rx: mpsc::Receiver<CellMsg>,
    timer_rx: mpsc::Receiver<TimerFire>,
    txns: TransactionSet,
    dialogs: DialogSet,
    /// Active forks keyed by their upstream server transaction.
    forks: HashMap<TransactionKey, ForkCtx>,
    /// Leg branch -> (upstream server key, leg index).
    fork_legs: HashMap<SmolStr, (TransactionKey, usize)>,
    /// Leg branch -> forwarded request (CANCEL construction).
    leg_requests: HashMap<SmolStr, SipMsg>,
    /// Original request per server transaction.
    uas_requests: HashMap<TransactionKey, SipMsg>,
    /// Stable local To tag per server transaction.
    uas_tags: HashMap<TransactionKey, SmolStr>,
    /// Requests this cell originated, per client transaction.
    uac_requests: HashMap<TransactionKey, SipMsg>,
    /// Where each transaction's Transmit actions go.
    txn_dests: HashMap<TransactionKey, TransportDest>,
    queue: VecDeque<Work>,
    self_tx: mpsc::Sender<CellMsg>,
    shared: Shared,
}

impl CallCell {
    pub(crate) fn spawn(call_id: SmolStr, shared: Shared) -> mpsc::Sender<CellMsg> {
        let (tx, rx) = mpsc::channel(64);
        let (timer_tx, timer_rx) = mpsc::channel(64);
        let cell = CallCell {
            self_tx: tx.clone(),
            txns: TransactionSet::new(timer_tx, TransactionLimits::default()),
            dialogs: DialogSet::new(call_id.clone()),
            forks: HashMap::new(),
            fork_legs: HashMap::new(),
            leg_requests: HashMap::new(),
            uas_requests: HashMap::new(),
            uas_tags: HashMap::new(),
            uac_requests: HashMap::new(),
            txn_dests: HashMap::new(),
            queue: VecDeque::new(),
            call_id: call_id.clone(),
            rx,
            timer_rx,
            shared,
        };
        tokio::spawn(cell.run());
        tx
    }

    async fn run(mut self) {
        info!(call_id = %self.call_id, "call cell started");
        let linger = self.shared.config.call_linger();
        loop {
            tokio::select! {
                maybe = self.rx.recv() => match maybe {
                    Some(CellMsg::Incoming { msg, origin }) => {
                        self.on_incoming(*msg, origin).await;
                    }
                    Some(CellMsg::AppReply { key, reply }) => {
                        self.on_app_reply(key, reply).await;
                    }
                    Some(CellMsg::SendRequest { msg, dest }) => {
                        self.on_send_request(*msg, dest).await;
                    }
                    Some(CellMsg::Shutdown) | None => break,
                },
                Some((key, timer)) = self.timer_rx.recv() => {
                    self.on_timer(key, timer).await;
                }
                _ = tokio::time::sleep(linger), if self.is_idle() => break,
            }
            self.txns.purge_terminated();
            self.gc_maps();
        }
        self.drain().await;
        self.shared.cells.remove(&self.call_id);
        let metrics = self.txns.metrics();
        info!(
            call_id = %self.call_id,
            client_txns = metrics.client_created,
            server_txns = metrics.server_created,
            evicted = metrics.evicted,
            "call cell stopped"
        );
    }

    fn is_idle(&self) -> bool {
        self.txns.is_empty() && self.forks.is_empty() && self.dialogs.is_empty()
    }

    /// Drops bookkeeping for transactions that no longer exist.
    fn gc_maps(&mut self) {
        let txns = &self.txns;
        let forks = &self.forks;
        let live = |key: &TransactionKey| txns.contains(key) || forks.contains_key(key);
        self.uas_requests.retain(|key, _| live(key));
        self.uas_tags.retain(|key, _| live(key));
        self.uac_requests.retain(|key, _| txns.contains(key));
        self.txn_dests.retain(|key, _| live(key));
    }

    fn push_txn_actions(&mut self, key: &TransactionKey, actions: Vec<TxnAction>) {
        for action in actions {
            self.queue.push_back(Work::Txn(key.clone(), action));
        }
    }

    fn push_fork_actions(&mut self, upstream: &TransactionKey, actions: Vec<ForkAction>) {
        for action in actions {
            self.queue.push_back(Work::Fork(upstream.clone(), action));
        }
    }

    /// Drains the work queue. Steps may enqueue follow-ups; the queue keeps
    /// ordering and prevents reentrancy.
    async fn pump(&mut self) {
        while let Some(work) = self.queue.pop_front() {
            match work {
                Work::Txn(key, action) => self.step_txn(key, action).await,
                Work::Fork(upstream, action) => self.step_fork(upstream, action).await,
            }
        }
    }

    // ---- incoming messages ----------------------------------------------

    async fn on_incoming(&mut self, msg: SipMsg, origin: TransportDest) {
        if msg.is_request() {
            self.on_request(msg, origin).await;
        } else {
            self.on_response(msg).await;
        }
        self.pump().await;
    }

    async fn on_request(&mut self, msg: SipMsg, origin: TransportDest) {
        let Some(key) = TransactionKey::from_msg(&msg, true) else {
            debug!(call_id = %self.call_id, "request without usable Via, dropped");
            return;
        };

        if msg.method() == &Method::Ack {
            self.on_ack(key, msg);
            return;
        }

        // Retransmission absorption: re-emit the cached response, no state
        // change.
        if self.txns.contains(&key) {
            let actions = match self.txns.get(&key).map(|e| &e.fsm) {
                Some(TxnFsm::InviteServer(fsm)) => fsm.on_retransmit(),
                Some(TxnFsm::NonInviteServer(fsm)) => fsm.on_retransmit(),
                _ => Vec::new(),
            };
            debug!(call_id = %self.call_id, branch = %key.branch, "request retransmission");
            self.push_txn_actions(&key, actions);
            return;
        }

        if msg.method() == &Method::Cancel {
            self.on_cancel(key, msg, origin);
            return;
        }

        // In-dialog requests carry our tag in To.
        if msg.to_tag().is_some() {
            self.on_in_dialog_request(key, msg, origin).await;
            return;
        }

        self.on_new_request(key, msg, origin).await;
    }

    fn on_ack(&mut self, key: TransactionKey, msg: SipMsg) {
        if self.txns.contains(&key) {
            let actions = match self.txns.get_mut(&key).map(|e| &mut e.fsm) {
                Some(TxnFsm::InviteServer(fsm)) => fsm.on_ack(),
                _ => Vec::new(),
            };
            self.push_txn_actions(&key, actions);
        } else {
            // ACK for a 2xx travels in-dialog.
            let _ = self.dialogs.on_uas_request(&msg);
        }
    }

    fn on_cancel(&mut self, key: TransactionKey, msg: SipMsg, origin: TransportDest) {
        let timers = self.server_timers(&origin);
        self.create_server_txn(
            &key,
            TxnFsm::NonInviteServer(NonInviteServerFsm::new(timers)),
            &msg,
            &origin,
        );

        let target = key.cancel_target();
        let honored = matches!(
            self.txns.get(&target).map(|e| &e.fsm),
            Some(TxnFsm::InviteServer(fsm)) if fsm.is_proceeding()
        );

        if !honored {
            debug!(call_id = %self.call_id, "CANCEL without matching INVITE in Proceeding");
            self.send_server_final(&key, msg.reply(481));
            return;
        }

        // 200 to the CANCEL itself, then 487 on the INVITE transaction.
        self.send_server_final(&key, msg.reply(200));

        if let Some(invite) = self.uas_requests.get(&target).cloned() {
            let tag = self.local_tag(&target);
            let terminated = invite.reply_tagged(487, &tag);
            self.respond(&target, terminated);
        }
        if let Some(ctx) = self.forks.get_mut(&target) {
            let actions = ctx.fork.cancel();
            self.push_fork_actions(&target, actions);
        }
    }

    async fn on_in_dialog_request(
        &mut self,
        key: TransactionKey,
        msg: SipMsg,
        origin: TransportDest,
    ) {
        self.create_uas_txn(&key, &msg, &origin);

        let Some(events) = self.dialogs.on_uas_request(&msg) else {
            self.send_server_final(&key, msg.reply(481));
            return;
        };
        for event in &events {
            debug!(call_id = %self.call_id, ?event, "dialog event");
        }

        match msg.method() {
            // the stack answers dialog housekeeping itself
            Method::Bye | Method::Notify => {
                let response = self.build_uas_response(&key, &msg, &SipReply::code(200));
                self.respond(&key, response);
            }
            _ => self.ask_application(&key, &msg),
        }
    }

    /// Runs the UAS answer callback off the cell loop; the reply comes back
    /// as a mailbox message. A panicking callback becomes a 500.
    fn ask_application(&mut self, key: &TransactionKey, msg: &SipMsg) {
        let app = self.shared.app.clone();
        let request = msg.clone();
        let handle = tokio::spawn(async move { app.on_request(&request).await });
        let tx = self.self_tx.clone();
        let key = key.clone();
        tokio::spawn(async move {
            let reply = match handle.await {
                Ok(reply) => reply,
                Err(_) => SipReply::code(500),
            };
            let _ = tx.send(CellMsg::AppReply { key, reply }).await;
        });
    }

    /// The application answered a request it was asked about earlier. If a
    /// CANCEL (or anything else) already completed the transaction, the
    /// send is absorbed by the state machine.
    async fn on_app_reply(&mut self, key: TransactionKey, reply: SipReply) {
        let Some(request) = self.uas_requests.get(&key).cloned() else {
            debug!(call_id = %self.call_id, branch = %key.branch, "answer for a finished transaction, dropped");
            return;
        };
        let response = self.build_uas_response(&key, &request, &reply);
        self.respond(&key, response);
        self.pump().await;
    }

    async fn on_new_request(&mut self, key: TransactionKey, msg: SipMsg, origin: TransportDest) {
        if msg.method() == &Method::Register {
            self.create_uas_txn(&key, &msg, &origin);
            self.on_register(key, msg).await;
            return;
        }

        if msg.method() == &Method::Publish {
            self.create_uas_txn(&key, &msg, &origin);
            let reply = self.shared.app.on_publish(&msg).await;
            let response = self.build_uas_response(&key, &msg, &reply);
            self.respond(&key, response);
            return;
        }

        // Ask the application where this request goes.
        let (scheme, user, domain) = route_parts(&msg);
        let verdict = self
            .shared
            .app
            .route(&scheme, user.as_deref(), &domain, &msg)
            .await;

        match verdict {
            RouteVerdict::ReplyStateless(reply) => {
                // no server transaction: build and push the bytes directly
                let response = reply.build(&msg);
                self.transmit(&response, &origin).await;
            }
            RouteVerdict::Reply(reply) => {
                self.create_uas_txn(&key, &msg, &origin);
                let response = self.build_uas_response(&key, &msg, &reply);
                self.respond(&key, response);
            }
            RouteVerdict::Process => {
                self.create_uas_txn(&key, &msg, &origin);
                self.maybe_trying(&key, &msg);
                self.ask_application(&key, &msg);
            }
            RouteVerdict::ProxyRuri { opts } => {
                self.create_uas_txn(&key, &msg, &origin);
                self.maybe_trying(&key, &msg);
                match msg.request_uri().and_then(Uri::as_sip) {
                    Some(uri) => {
                        let target = uri.clone();
                        self.proxy_start(key, msg, vec![target], opts).await;
                    }
                    None => self.respond(&key, msg.reply(416)),
                }
            }
            RouteVerdict::ProxyTo { targets, opts } => {
                self.create_uas_txn(&key, &msg, &origin);
                self.maybe_trying(&key, &msg);
                if targets.is_empty() {
                    self.respond(&key, msg.reply(480));
                } else {
                    self.proxy_start(key, msg, targets, opts).await;
                }
            }
        }
    }

    async fn on_register(&mut self, key: TransactionKey, msg: SipMsg) {
        let request = match self.shared.plugins.fold_registrar_request(msg.clone()).await {
            Ok(request) => request,
            Err(reply) => {
                let response = reply.build(&msg);
                self.respond(&key, response);
                return;
            }
        };
        let response = self.shared.registrar.handle_register(&request).await;
        let response = match self.shared.plugins.fold_registrar_reply(response).await {
            Ok(response) => response,
            Err(reply) => reply.build(&msg),
        };
        self.respond(&key, response);
    }

    /// Originates a request as UAC: fresh branch, plugin header pass, a
    /// client transaction, and off it goes.
    async fn on_send_request(&mut self, mut msg: SipMsg, dest: TransportDest) {
        if msg.top_branch().is_none() {
            let branch = generate_branch();
            match msg.vias.first_mut() {
                Some(via) => via.set_branch(branch),
                None => {
                    let mut via = ViaHeader::new(
                        dest.transport,
                        self.shared.identity.host.clone(),
                        Some(self.shared.identity.port),
                    );
                    via.set_branch(branch);
                    msg.vias.push(via);
                }
            }
        }
        let msg = match self.shared.plugins.fold_uac_headers(msg).await {
            Ok(msg) => msg,
            Err(reply) => {
                debug!(call_id = %self.call_id, code = reply.code, "plugin rejected outbound request");
                return;
            }
        };
        let Some(key) = TransactionKey::from_msg(&msg, false) else {
            return;
        };
        if self.txns.contains(&key) {
            warn!(call_id = %self.call_id, branch = %key.branch, "outbound request duplicates a live transaction");
            return;
        }
        let timers = TransportTimers::new(dest.transport, self.shared.timer_defaults);
        self.txn_dests.insert(key.clone(), dest);
        self.uac_requests.insert(key.clone(), msg.clone());
        let actions = if msg.method() == &Method::Invite {
            let mut fsm = InviteClientFsm::new(timers);
            let actions = fsm.send_invite(msg);
            self.txns.insert(key.clone(), TxnFsm::InviteClient(fsm));
            actions
        } else {
            let mut fsm = NonInviteClientFsm::new(timers);
            let actions = fsm.send_request(msg);
            self.txns.insert(key.clone(), TxnFsm::NonInviteClient(fsm));
            actions
        };
        self.push_txn_actions(&key, actions);
        self.pump().await;
    }

    // ---- proxying -------------------------------------------------------

    async fn proxy_start(
        &mut self,
        upstream: TransactionKey,
        msg: SipMsg,
        targets: Vec<SipUri>,
        opts: ProxyOpts,
    ) {
        if detect_loop(&msg, &self.shared.identity.host) {
            warn!(call_id = %self.call_id, "loop detected, answering 482");
            self.respond(&upstream, msg.reply(482));
            return;
        }
        let opts = match self.shared.plugins.fold_proxy_opts(&msg, opts).await {
            Ok(opts) => opts,
            Err(reply) => {
                let response = reply.build(&msg);
                self.respond(&upstream, response);
                return;
            }
        };

        let follow_redirects = opts.follow_redirects;
        let mode = if follow_redirects && targets.len() == 1 {
            ForkMode::Serial
        } else {
            ForkMode::Parallel
        };
        let mut fork = ForkState::new(msg, targets, mode, follow_redirects);
        let actions = fork.start();
        self.forks.insert(upstream.clone(), ForkCtx { fork, opts });
        self.push_fork_actions(&upstream, actions);
    }

    /// Executes one fork action.
    async fn step_fork(&mut self, upstream: TransactionKey, action: ForkAction) {
        match action {
            ForkAction::Launch { index, target } => self.launch_leg(&upstream, index, &target),
            ForkAction::CancelBranch { index } => self.cancel_leg(&upstream, index),
            ForkAction::ForwardUpstream(response) => {
                self.forward_upstream(&upstream, response).await;
            }
            ForkAction::Finished => self.finish_fork(&upstream),
        }
    }

    /// Launches one leg; failures feed straight back into the aggregator.
    fn launch_leg(&mut self, upstream: &TransactionKey, index: usize, target: &SipUri) {
        let Some(ctx) = self.forks.get_mut(upstream) else {
            return;
        };
        let prepared =
            prepare_forward(ctx.fork.original(), target, &self.shared.identity, &ctx.opts);
        let (forwarded, branch) = match prepared {
            Ok(done) => done,
            Err(ForwardError::MaxForwardsExhausted) => {
                let actions = ctx.fork.on_branch_failure(index, 483);
                self.push_fork_actions(upstream, actions);
                return;
            }
            Err(error) => {
                warn!(call_id = %self.call_id, %error, "leg preparation failed");
                let actions = ctx.fork.on_branch_failure(index, 500);
                self.push_fork_actions(upstream, actions);
                return;
            }
        };
        ctx.fork.record_branch_id(index, branch.clone());

        let is_invite = forwarded.method() == &Method::Invite;
        let dest = TransportDest::from_uri(target);
        let timers = TransportTimers::new(dest.transport, self.shared.timer_defaults);
        let role = if is_invite {
            TxnRole::InviteClient
        } else {
            TxnRole::NonInviteClient
        };
        let key = TransactionKey::new(branch.clone(), forwarded.method().clone(), role);

        self.fork_legs
            .insert(branch.clone(), (upstream.clone(), index));
        self.leg_requests.insert(branch.clone(), forwarded.clone());
        self.txn_dests.insert(key.clone(), dest);

        let actions = if is_invite {
            let mut fsm = InviteClientFsm::new(timers);
            let actions = fsm.send_invite(forwarded);
            self.txns.insert(key.clone(), TxnFsm::InviteClient(fsm));
            actions
        } else {
            let mut fsm = NonInviteClientFsm::new(timers);
            let actions = fsm.send_request(forwarded);
            self.txns.insert(key.clone(), TxnFsm::NonInviteClient(fsm));
            actions
        };
        self.push_txn_actions(&key, actions);
        if is_invite {
            // Timer C bounds the whole leg while it rings.
            self.txns
                .schedule(&key, TimerId::C, self.shared.timer_defaults.tc);
        }
    }

    fn cancel_leg(&mut self, upstream: &TransactionKey, index: usize) {
        let Some(branch) = self
            .forks
            .get(upstream)
            .and_then(|ctx| ctx.fork.branches().get(index))
            .and_then(|leg| leg.branch_id.clone())
        else {
            return;
        };
        let Some(leg_request) = self.leg_requests.get(&branch).cloned() else {
            return;
        };
        let invite_key = TransactionKey::new(branch.clone(), Method::Invite, TxnRole::InviteClient);
        let Some(dest) = self.txn_dests.get(&invite_key).cloned() else {
            return;
        };
        let cancel = cancel_for(&leg_request);
        let timers = TransportTimers::new(dest.transport, self.shared.timer_defaults);
        let key = TransactionKey::new(branch, Method::Cancel, TxnRole::NonInviteClient);
        let mut fsm = NonInviteClientFsm::new(timers);
        let actions = fsm.send_request(cancel);
        self.txn_dests.insert(key.clone(), dest);
        self.txns.insert(key.clone(), TxnFsm::NonInviteClient(fsm));
        self.push_txn_actions(&key, actions);
    }

    async fn forward_upstream(&mut self, upstream: &TransactionKey, response: SipMsg) {
        let Some(prepared) = prepare_response_upstream(&response) else {
            debug!(call_id = %self.call_id, "response addressed to this proxy, not forwarded");
            return;
        };
        if self.txns.contains(upstream) {
            self.respond(upstream, prepared);
        } else if let Some(origin) = self.txn_dests.get(upstream).cloned() {
            // after the first 2xx the server transaction is gone; later 2xx
            // from other legs still travel upstream statelessly
            self.transmit(&prepared, &origin).await;
        }
    }

    fn finish_fork(&mut self, upstream: &TransactionKey) {
        if self.forks.remove(upstream).is_some() {
            let legs: Vec<SmolStr> = self
                .fork_legs
                .iter()
                .filter(|(_, (key, _))| key == upstream)
                .map(|(branch, _)| branch.clone())
                .collect();
            for branch in legs {
                self.fork_legs.remove(&branch);
                self.leg_requests.remove(&branch);
            }
            debug!(call_id = %self.call_id, "fork finished");
        }
    }

    // ---- responses ------------------------------------------------------

    async fn on_response(&mut self, msg: SipMsg) {
        let Some(key) = TransactionKey::from_msg(&msg, false) else {
            return;
        };
        if !self.txns.contains(&key) {
            debug!(call_id = %self.call_id, branch = %key.branch, "response without transaction, dropped");
            return;
        }
        let actions = match self.txns.get_mut(&key).map(|e| &mut e.fsm) {
            Some(TxnFsm::InviteClient(fsm)) => fsm.on_response(msg),
            Some(TxnFsm::NonInviteClient(fsm)) => fsm.on_response(msg),
            _ => {
                debug!(call_id = %self.call_id, "response matched a server transaction, dropped");
                Vec::new()
            }
        };
        self.push_txn_actions(&key, actions);
    }

    /// Routes a response delivered by a client transaction to its user:
    /// the owning fork, or this cell's own client request bookkeeping.
    async fn deliver(&mut self, key: &TransactionKey, response: SipMsg) {
        if let Some((upstream, index)) = self.fork_legs.get(&key.branch).cloned() {
            if key.method == Method::Cancel {
                // responses to our CANCELs need no aggregation
                return;
            }
            let provisional = response.is_provisional();
            if !provisional {
                self.txns.cancel_timer(key, TimerId::C);
            }
            let actions = match self.forks.get_mut(&upstream) {
                Some(ctx) if provisional => ctx.fork.on_provisional(index, response),
                Some(ctx) => ctx.fork.on_final(index, response),
                None => return,
            };
            self.push_fork_actions(&upstream, actions);
            return;
        }

        if let Some(request) = self.uac_requests.get(key).cloned() {
            let events = self.dialogs.on_uac_response(&request, &response);
            for event in &events {
                debug!(call_id = %self.call_id, ?event, "dialog event");
            }
        }
        self.shared.app.on_response(&response).await;
    }

    // ---- transaction action execution -----------------------------------

    async fn step_txn(&mut self, key: TransactionKey, action: TxnAction) {
        match action {
            TxnAction::Transmit(msg) => {
                let Some(dest) = self.txn_dests.get(&key).cloned() else {
                    warn!(call_id = %self.call_id, branch = %key.branch, "no destination for transmit");
                    return;
                };
                if !self.transmit(&msg, &dest).await && !key.role.is_server() {
                    self.on_send_failure(&key);
                }
            }
            TxnAction::Deliver(response) => {
                self.deliver(&key, response).await;
            }
            TxnAction::Schedule { timer, duration } => {
                self.txns.schedule(&key, timer, duration);
            }
            TxnAction::CancelTimer(timer) => {
                self.txns.cancel_timer(&key, timer);
            }
            TxnAction::Terminate { reason } => {
                debug!(call_id = %self.call_id, branch = %key.branch, %reason, "transaction terminated");
                // a fork leg that dies without a final counts as a timeout;
                // the aggregator ignores legs that already completed
                self.leg_failure(&key, 408);
            }
        }
    }

    /// Client transaction could not send: synthesize a local 503.
    fn on_send_failure(&mut self, key: &TransactionKey) {
        let actions = self
            .txns
            .get_mut(key)
            .map(|entry| entry.fsm.on_transport_error())
            .unwrap_or_default();
        self.leg_failure(key, 503);
        for action in actions {
            if let TxnAction::Terminate { reason } = action {
                debug!(call_id = %self.call_id, %reason, "transaction terminated");
            }
        }
    }

    /// Feeds a synthesized failure for a fork leg into its aggregator.
    fn leg_failure(&mut self, key: &TransactionKey, code: u16) {
        if key.method == Method::Cancel {
            return;
        }
        if let Some((upstream, index)) = self.fork_legs.get(&key.branch).cloned() {
            let actions = match self.forks.get_mut(&upstream) {
                Some(ctx) => ctx.fork.on_branch_failure(index, code),
                None => Vec::new(),
            };
            self.push_fork_actions(&upstream, actions);
        }
    }

    async fn on_timer(&mut self, key: TransactionKey, timer: TimerId) {
        if timer == TimerId::C {
            // proxy INVITE took too long: cancel the ringing peer and give
            // up on the leg
            if let Some((upstream, index)) = self.fork_legs.get(&key.branch).cloned() {
                let ringing = matches!(
                    self.txns.get(&key).map(|e| &e.fsm),
                    Some(TxnFsm::InviteClient(fsm)) if fsm.state == InviteClientState::Proceeding
                );
                let mut actions = match self.forks.get_mut(&upstream) {
                    Some(ctx) => ctx.fork.on_branch_failure(index, 408),
                    None => Vec::new(),
                };
                if ringing {
                    actions.push(ForkAction::CancelBranch { index });
                }
                self.txns.remove(&key);
                self.push_fork_actions(&upstream, actions);
            }
        } else {
            let actions = self
                .txns
                .get_mut(&key)
                .map(|entry| entry.fsm.on_timer(timer))
                .unwrap_or_default();
            self.push_txn_actions(&key, actions);
        }
        self.pump().await;
    }

    // ---- plumbing -------------------------------------------------------

    fn server_timers(&self, origin: &TransportDest) -> TransportTimers {
        TransportTimers::new(origin.transport, self.shared.timer_defaults)
    }

    fn create_uas_txn(&mut self, key: &TransactionKey, msg: &SipMsg, origin: &TransportDest) {
        let timers = self.server_timers(origin);
        let fsm = if msg.method() == &Method::Invite {
            TxnFsm::InviteServer(InviteServerFsm::new(timers))
        } else {
            TxnFsm::NonInviteServer(NonInviteServerFsm::new(timers))
        };
        self.create_server_txn(key, fsm, msg, origin);
    }

    fn create_server_txn(
        &mut self,
        key: &TransactionKey,
        fsm: TxnFsm,
        msg: &SipMsg,
        origin: &TransportDest,
    ) {
        if self.txns.insert(key.clone(), fsm) {
            self.uas_requests.insert(key.clone(), msg.clone());
            self.txn_dests.insert(key.clone(), origin.clone());
        }
    }

    /// 100 Trying for INVITE, suppressible via configuration.
    fn maybe_trying(&mut self, key: &TransactionKey, msg: &SipMsg) {
        if msg.method() != &Method::Invite || !self.shared.config.auto_100_trying {
            return;
        }
        let trying = msg.reply(100);
        let actions = match self.txns.get_mut(key).map(|e| &mut e.fsm) {
            Some(TxnFsm::InviteServer(fsm)) => fsm.send_provisional(trying),
            _ => Vec::new(),
        };
        self.push_txn_actions(key, actions);
    }

    /// The stable To tag this cell answers a server transaction with.
    fn local_tag(&mut self, key: &TransactionKey) -> SmolStr {
        self.uas_tags
            .entry(key.clone())
            .or_insert_with(generate_tag)
            .clone()
    }

    /// Builds a response from an application reply, pinning the local tag
    /// so every response of the transaction agrees.
    fn build_uas_response(
        &mut self,
        key: &TransactionKey,
        msg: &SipMsg,
        reply: &SipReply,
    ) -> SipMsg {
        let mut response = reply.build(msg);
        if reply.code > 100 && msg.to_tag().is_none() {
            let tag = self.local_tag(key);
            response.to.set_tag(tag);
        }
        response
    }

    /// Sends a response through the owning server transaction.
    ///
    /// Dialog state only moves when the state machine actually accepts the
    /// response; an answer the machine absorbs (a late 200 after a CANCEL
    /// already won) leaves no trace.
    fn respond(&mut self, key: &TransactionKey, response: SipMsg) {
        let provisional = response.is_provisional();
        let mirror = response.clone();
        let actions = match self.txns.get_mut(key).map(|e| &mut e.fsm) {
            Some(TxnFsm::InviteServer(fsm)) if provisional => fsm.send_provisional(response),
            Some(TxnFsm::InviteServer(fsm)) => fsm.send_final(response),
            Some(TxnFsm::NonInviteServer(fsm)) if provisional => fsm.send_provisional(response),
            Some(TxnFsm::NonInviteServer(fsm)) => fsm.send_final(response),
            _ => Vec::new(),
        };
        if actions.is_empty() {
            debug!(call_id = %self.call_id, branch = %key.branch, "response absorbed by transaction state");
            return;
        }
        if let Some(request) = self.uas_requests.get(key).cloned() {
            let events = self.dialogs.on_uas_response(&request, &mirror);
            for event in &events {
                debug!(call_id = %self.call_id, ?event, "dialog event");
            }
        }
        self.push_txn_actions(key, actions);
    }

    fn send_server_final(&mut self, key: &TransactionKey, response: SipMsg) {
        self.respond(key, response);
    }

    /// Serializes and pushes a message. Returns false on send failure.
    async fn transmit(&mut self, msg: &SipMsg, dest: &TransportDest) -> bool {
        let payload = serialize_msg(msg);
        match self.shared.transport.send(dest, payload.clone()).await {
            Ok(()) => {
                self.shared.plugins.notify_sent(dest, &payload);
                true
            }
            Err(error) => {
                warn!(call_id = %self.call_id, %dest, %error, "send failed");
                false
            }
        }
    }

    /// Shutdown path: answer 487 on anything still proceeding, cancel
    /// forks, drop timers.
    async fn drain(&mut self) {
        let proceeding: Vec<TransactionKey> = self
            .txns
            .keys()
            .filter(|key| {
                matches!(
                    self.txns.get(key).map(|e| &e.fsm),
                    Some(TxnFsm::InviteServer(fsm)) if fsm.is_proceeding()
                )
            })
            .cloned()
            .collect();
        for key in proceeding {
            if let Some(request) = self.uas_requests.get(&key).cloned() {
                let tag = self.local_tag(&key);
                let response = request.reply_tagged(487, &tag);
                self.send_server_final(&key, response);
            }
        }
        let upstreams: Vec<TransactionKey> = self.forks.keys().cloned().collect();
        for upstream in upstreams {
            let actions = match self.forks.get_mut(&upstream) {
                Some(ctx) => ctx.fork.cancel(),
                None => Vec::new(),
            };
            self.push_fork_actions(&upstream, actions);
        }
        self.pump().await;
        self.txns.clear();
        self.dialogs.clear();
    }
}

/// CANCEL for a forwarded request: same Request-URI, Via, Call-ID, From,
/// To, and CSeq number (RFC 3261 §9.1).
fn cancel_for(request: &SipMsg) -> SipMsg {
    let uri = request
        .request_uri()
        .cloned()
        .unwrap_or_else(|| Uri::Sip(SipUri::new("invalid.invalid")));
    let mut cancel = SipMsg::new_request(
        Method::Cancel,
        uri,
        request.call_id.clone(),
        request.from.clone(),
        request.to.clone(),
        request.cseq.seq,
    );
    cancel.vias = request.top_via().cloned().into_iter().collect();
    cancel.routes = request.routes.clone();
    cancel.max_forwards = request.max_forwards;
    cancel
}

fn route_parts(msg: &SipMsg) -> (SmolStr, Option<SmolStr>, SmolStr) {
    match msg.request_uri() {
        Some(Uri::Sip(uri)) => (
            SmolStr::new(uri.scheme()),
            uri.user.clone(),
            uri.host.clone(),
        ),
        Some(Uri::Tel(uri)) => (
            SmolStr::new("tel"),
            Some(uri.number.clone()),
            SmolStr::default(),
        ),
        Some(Uri::Mailto(raw)) => (SmolStr::new("mailto"), None, SmolStr::new(raw.as_str())),
        None => (SmolStr::default(), None, SmolStr::default()),
    }
}
