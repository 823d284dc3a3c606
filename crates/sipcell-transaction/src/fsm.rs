// sipcell - The Sipcell SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The four transaction state machines.
//!
//! Each machine is synchronous: feeding it an event returns the actions the
//! runtime must take (transmit, schedule/cancel timers, deliver to the TU,
//! terminate). Retransmission absorption is implemented by caching the last
//! provisional/final message inside the machine.

use std::time::Duration;

use sipcell_core::{msg::ack_for, SipMsg};
use smol_str::SmolStr;

use crate::timers::{TimerId, TransportTimers};

/// Actions a state machine asks its runtime to perform, in order.
#[derive(Debug, Clone)]
pub enum TxnAction {
    /// Send the message toward the peer this transaction talks to.
    Transmit(SipMsg),
    /// Hand a response up to the transaction user.
    Deliver(SipMsg),
    Schedule { timer: TimerId, duration: Duration },
    CancelTimer(TimerId),
    Terminate { reason: SmolStr },
}

/// INVITE client transaction states (RFC 3261 Figure 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InviteClientState {
    Calling,
    Proceeding,
    Completed,
    Terminated,
}

/// Non-INVITE client transaction states (RFC 3261 Figure 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NonInviteClientState {
    Trying,
    Proceeding,
    Completed,
    Terminated,
}

/// INVITE server transaction states (RFC 3261 Figure 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InviteServerState {
    Proceeding,
    Completed,
    Confirmed,
    Terminated,
}

/// Non-INVITE server transaction states (RFC 3261 Figure 8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NonInviteServerState {
    Trying,
    Proceeding,
    Completed,
    Terminated,
}

/// Implements the INVITE client transaction (RFC 3261 §17.1.1).
pub struct InviteClientFsm {
    pub state: InviteClientState,
    timers: TransportTimers,
    a_interval: Duration,
    invite: Option<SipMsg>,
    ack: Option<SipMsg>,
}

impl InviteClientFsm {
    pub fn new(timers: TransportTimers) -> Self {
        Self {
            state: InviteClientState::Calling,
            a_interval: timers.duration(TimerId::A),
            timers,
            invite: None,
            ack: None,
        }
    }

    /// Fires the initial INVITE, arming timers A and B.
    pub fn send_invite(&mut self, invite: SipMsg) -> Vec<TxnAction> {
        self.invite = Some(invite.clone());
        let mut actions = vec![TxnAction::Transmit(invite)];
        if self.timers.should_retransmit() {
            actions.push(TxnAction::Schedule {
                timer: TimerId::A,
                duration: self.a_interval,
            });
        }
        actions.push(TxnAction::Schedule {
            timer: TimerId::B,
            duration: self.timers.duration(TimerId::B),
        });
        actions
    }

    pub fn on_response(&mut self, response: SipMsg) -> Vec<TxnAction> {
        use InviteClientState::*;
        let code = response.code().unwrap_or(0);
        match (self.state, code) {
            (Calling | Proceeding, 100..=199) => {
                self.state = Proceeding;
                vec![
                    TxnAction::CancelTimer(TimerId::A),
                    TxnAction::Deliver(response),
                ]
            }
            (Calling | Proceeding, 200..=299) => {
                // 2xx terminates the transaction; ACK is the TU's job.
                self.state = Terminated;
                vec![
                    TxnAction::CancelTimer(TimerId::A),
                    TxnAction::CancelTimer(TimerId::B),
                    TxnAction::Deliver(response),
                    TxnAction::Terminate {
                        reason: SmolStr::new("2xx received"),
                    },
                ]
            }
            (Calling | Proceeding, 300..=699) => self.complete_with(response),
            (Completed, 300..=699) => {
                // Retransmitted final: re-fire the cached ACK, nothing else.
                match &self.ack {
                    Some(ack) => vec![TxnAction::Transmit(ack.clone())],
                    None => Vec::new(),
                }
            }
            _ => Vec::new(),
        }
    }

    fn complete_with(&mut self, response: SipMsg) -> Vec<TxnAction> {
        let mut actions = vec![
            TxnAction::CancelTimer(TimerId::A),
            TxnAction::CancelTimer(TimerId::B),
            TxnAction::Deliver(response.clone()),
        ];
        if let Some(ack) = self.invite.as_ref().and_then(|inv| ack_for(inv, &response)) {
            self.ack = Some(ack.clone());
            actions.push(TxnAction::Transmit(ack));
        }
        let linger = self.timers.duration(TimerId::D);
        if linger.is_zero() {
            self.state = InviteClientState::Terminated;
            actions.push(TxnAction::Terminate {
                reason: SmolStr::new("completed on reliable transport"),
            });
        } else {
            self.state = InviteClientState::Completed;
            actions.push(TxnAction::Schedule {
                timer: TimerId::D,
                duration: linger,
            });
        }
        actions
    }

    pub fn on_timer(&mut self, timer: TimerId) -> Vec<TxnAction> {
        use InviteClientState::*;
        match (self.state, timer) {
            (Calling, TimerId::A) => {
                self.a_interval = (self.a_interval * 2).min(self.timers.t2());
                match &self.invite {
                    Some(invite) => vec![
                        TxnAction::Transmit(invite.clone()),
                        TxnAction::Schedule {
                            timer: TimerId::A,
                            duration: self.a_interval,
                        },
                    ],
                    None => Vec::new(),
                }
            }
            (Calling | Proceeding, TimerId::B) => {
                self.state = Terminated;
                vec![
                    TxnAction::CancelTimer(TimerId::A),
                    TxnAction::Terminate {
                        reason: SmolStr::new("timer B expired"),
                    },
                ]
            }
            (Completed, TimerId::D) => {
                self.state = Terminated;
                vec![TxnAction::Terminate {
                    reason: SmolStr::new("timer D expired"),
                }]
            }
            _ => Vec::new(),
        }
    }

    pub fn on_transport_error(&mut self) -> Vec<TxnAction> {
        self.state = InviteClientState::Terminated;
        vec![TxnAction::Terminate {
            reason: SmolStr::new("transport error"),
        }]
    }
}

/// Implements the non-INVITE client transaction (RFC 3261 §17.1.2).
pub struct NonInviteClientFsm {
    pub state: NonInviteClientState,
    timers: TransportTimers,
    e_interval: Duration,
    request: Option<SipMsg>,
}

impl NonInviteClientFsm {
    pub fn new(timers: TransportTimers) -> Self {
        Self {
            state: NonInviteClientState::Trying,
            e_interval: timers.duration(TimerId::E),
            timers,
            request: None,
        }
    }

    pub fn send_request(&mut self, request: SipMsg) -> Vec<TxnAction> {
        self.request = Some(request.clone());
        let mut actions = vec![TxnAction::Transmit(request)];
        if self.timers.should_retransmit() {
            actions.push(TxnAction::Schedule {
                timer: TimerId::E,
                duration: self.e_interval,
            });
        }
        actions.push(TxnAction::Schedule {
            timer: TimerId::F,
            duration: self.timers.duration(TimerId::F),
        });
        actions
    }

    pub fn on_response(&mut self, response: SipMsg) -> Vec<TxnAction> {
        use NonInviteClientState::*;
        let code = response.code().unwrap_or(0);
        match (self.state, code) {
            (Trying | Proceeding, 100..=199) => {
                self.state = Proceeding;
                vec![TxnAction::Deliver(response)]
            }
            (Trying | Proceeding, 200..=699) => {
                let mut actions = vec![
                    TxnAction::Deliver(response),
                    TxnAction::CancelTimer(TimerId::E),
                    TxnAction::CancelTimer(TimerId::F),
                ];
                let linger = self.timers.duration(TimerId::K);
                if linger.is_zero() {
                    self.state = Terminated;
                    actions.push(TxnAction::Terminate {
                        reason: SmolStr::new("completed on reliable transport"),
                    });
                } else {
                    self.state = Completed;
                    actions.push(TxnAction::Schedule {
                        timer: TimerId::K,
                        duration: linger,
                    });
                }
                actions
            }
            // Retransmitted finals in Completed are absorbed silently.
            _ => Vec::new(),
        }
    }

    pub fn on_timer(&mut self, timer: TimerId) -> Vec<TxnAction> {
        use NonInviteClientState::*;
        match (self.state, timer) {
            (Trying | Proceeding, TimerId::E) => {
                // In Proceeding the retransmit interval pins to T2.
                self.e_interval = match self.state {
                    Proceeding => self.timers.t2(),
                    _ => (self.e_interval * 2).min(self.timers.t2()),
                };
                match &self.request {
                    Some(request) => vec![
                        TxnAction::Transmit(request.clone()),
                        TxnAction::Schedule {
                            timer: TimerId::E,
                            duration: self.e_interval,
                        },
                    ],
                    None => Vec::new(),
                }
            }
            (Trying | Proceeding, TimerId::F) => {
                self.state = Terminated;
                vec![
                    TxnAction::CancelTimer(TimerId::E),
                    TxnAction::Terminate {
                        reason: SmolStr::new("timer F expired"),
                    },
                ]
            }
            (Completed, TimerId::K) => {
                self.state = Terminated;
                vec![TxnAction::Terminate {
                    reason: SmolStr::new("timer K expired"),
                }]
            }
            _ => Vec::new(),
        }
    }

    pub fn on_transport_error(&mut self) -> Vec<TxnAction> {
        self.state = NonInviteClientState::Terminated;
        vec![TxnAction::Terminate {
            reason: SmolStr::new("transport error"),
        }]
    }
}

/// Implements the INVITE server transaction (RFC 3261 §17.2.1).
pub struct InviteServerFsm {
    pub state: InviteServerState,
    timers: TransportTimers,
    g_interval: Duration,
    last_provisional: Option<SipMsg>,
    last_final: Option<SipMsg>,
}

impl InviteServerFsm {
    /// A server INVITE transaction starts in Proceeding on arrival.
    pub fn new(timers: TransportTimers) -> Self {
        Self {
            state: InviteServerState::Proceeding,
            g_interval: timers.duration(TimerId::G),
            timers,
            last_provisional: None,
            last_final: None,
        }
    }

    /// True while a CANCEL can still be honored.
    pub fn is_proceeding(&self) -> bool {
        self.state == InviteServerState::Proceeding
    }

    /// Re-emits the cached response for a retransmitted INVITE.
    pub fn on_retransmit(&self) -> Vec<TxnAction> {
        let cached = match self.state {
            InviteServerState::Proceeding => self.last_provisional.as_ref(),
            InviteServerState::Completed => self.last_final.as_ref(),
            _ => None,
        };
        match cached {
            Some(response) => vec![TxnAction::Transmit(response.clone())],
            None => Vec::new(),
        }
    }

    pub fn send_provisional(&mut self, response: SipMsg) -> Vec<TxnAction> {
        if self.state != InviteServerState::Proceeding {
            return Vec::new();
        }
        self.last_provisional = Some(response.clone());
        vec![TxnAction::Transmit(response)]
    }

    /// Sends the final response. Only honored in Proceeding; a TU that
    /// answers 200 after the transaction already completed (a lost CANCEL
    /// race) is ignored.
    pub fn send_final(&mut self, response: SipMsg) -> Vec<TxnAction> {
        if self.state != InviteServerState::Proceeding {
            return Vec::new();
        }
        let code = response.code().unwrap_or(0);
        if (200..300).contains(&code) {
            // 2xx retransmission is owned by the TU (RFC 3261 §13.3.1.4).
            self.state = InviteServerState::Terminated;
            return vec![
                TxnAction::Transmit(response),
                TxnAction::Terminate {
                    reason: SmolStr::new("2xx sent"),
                },
            ];
        }
        self.last_final = Some(response.clone());
        self.state = InviteServerState::Completed;
        let mut actions = vec![TxnAction::Transmit(response)];
        if self.timers.should_retransmit() {
            self.g_interval = self.timers.duration(TimerId::G);
            actions.push(TxnAction::Schedule {
                timer: TimerId::G,
                duration: self.g_interval,
            });
        }
        actions.push(TxnAction::Schedule {
            timer: TimerId::H,
            duration: self.timers.duration(TimerId::H),
        });
        actions
    }

    pub fn on_ack(&mut self) -> Vec<TxnAction> {
        if self.state != InviteServerState::Completed {
            return Vec::new();
        }
        let mut actions = vec![
            TxnAction::CancelTimer(TimerId::G),
            TxnAction::CancelTimer(TimerId::H),
        ];
        let linger = self.timers.duration(TimerId::I);
        if linger.is_zero() {
            self.state = InviteServerState::Terminated;
            actions.push(TxnAction::Terminate {
                reason: SmolStr::new("confirmed on reliable transport"),
            });
        } else {
            self.state = InviteServerState::Confirmed;
            actions.push(TxnAction::Schedule {
                timer: TimerId::I,
                duration: linger,
            });
        }
        actions
    }

    pub fn on_timer(&mut self, timer: TimerId) -> Vec<TxnAction> {
        use InviteServerState::*;
        match (self.state, timer) {
            (Completed, TimerId::G) => match &self.last_final {
                Some(response) => {
                    let retransmit = TxnAction::Transmit(response.clone());
                    self.g_interval = (self.g_interval * 2).min(self.timers.t2());
                    vec![
                        retransmit,
                        TxnAction::Schedule {
                            timer: TimerId::G,
                            duration: self.g_interval,
                        },
                    ]
                }
                None => Vec::new(),
            },
            (Completed, TimerId::H) => {
                self.state = Terminated;
                vec![
                    TxnAction::CancelTimer(TimerId::G),
                    TxnAction::Terminate {
                        reason: SmolStr::new("timer H expired, no ACK"),
                    },
                ]
            }
            (Confirmed, TimerId::I) => {
                self.state = Terminated;
                vec![TxnAction::Terminate {
                    reason: SmolStr::new("timer I expired"),
                }]
            }
            _ => Vec::new(),
        }
    }

    pub fn on_transport_error(&mut self) -> Vec<TxnAction> {
        self.state = InviteServerState::Terminated;
        vec![TxnAction::Terminate {
            reason: SmolStr::new("transport error"),
        }]
    }
}

/// Implements the non-INVITE server transaction (RFC 3261 §17.2.2).
pub struct NonInviteServerFsm {
    pub state: NonInviteServerState,
    timers: TransportTimers,
    last_provisional: Option<SipMsg>,
    last_final: Option<SipMsg>,
}

impl NonInviteServerFsm {
    pub fn new(timers: TransportTimers) -> Self {
        Self {
            state: NonInviteServerState::Trying,
            timers,
            last_provisional: None,
            last_final: None,
        }
    }

    /// Re-emits the cached response for a retransmitted request; requests
    /// retransmitted while still in Trying are absorbed silently.
    pub fn on_retransmit(&self) -> Vec<TxnAction> {
        let cached = match self.state {
            NonInviteServerState::Proceeding => self.last_provisional.as_ref(),
            NonInviteServerState::Completed => self.last_final.as_ref(),
            _ => None,
        };
        match cached {
            Some(response) => vec![TxnAction::Transmit(response.clone())],
            None => Vec::new(),
        }
    }

    pub fn send_provisional(&mut self, response: SipMsg) -> Vec<TxnAction> {
        use NonInviteServerState::*;
        if !matches!(self.state, Trying | Proceeding) {
            return Vec::new();
        }
        self.state = Proceeding;
        self.last_provisional = Some(response.clone());
        vec![TxnAction::Transmit(response)]
    }

    pub fn send_final(&mut self, response: SipMsg) -> Vec<TxnAction> {
        use NonInviteServerState::*;
        if !matches!(self.state, Trying | Proceeding) {
            return Vec::new();
        }
        self.last_final = Some(response.clone());
        let mut actions = vec![TxnAction::Transmit(response)];
        let linger = self.timers.duration(TimerId::J);
        if linger.is_zero() {
            self.state = Terminated;
            actions.push(TxnAction::Terminate {
                reason: SmolStr::new("completed on reliable transport"),
            });
        } else {
            self.state = Completed;
            actions.push(TxnAction::Schedule {
                timer: TimerId::J,
                duration: linger,
            });
        }
        actions
    }

    pub fn on_timer(&mut self, timer: TimerId) -> Vec<TxnAction> {
        if self.state == NonInviteServerState::Completed && timer == TimerId::J {
            self.state = NonInviteServerState::Terminated;
            return vec![TxnAction::Terminate {
                reason: SmolStr::new("timer J expired"),
            }];
        }
        Vec::new()
    }

    pub fn on_transport_error(&mut self) -> Vec<TxnAction> {
        self.state = NonInviteServerState::Terminated;
        vec![TxnAction::Terminate {
            reason: SmolStr::new("transport error"),
        }]
    }
}

/// One of the four machines, as stored in a transaction set entry.
pub enum TxnFsm {
    InviteClient(InviteClientFsm),
    NonInviteClient(NonInviteClientFsm),
    InviteServer(InviteServerFsm),
    NonInviteServer(NonInviteServerFsm),
}

impl TxnFsm {
    pub fn is_terminated(&self) -> bool {
        match self {
            TxnFsm::InviteClient(fsm) => fsm.state == InviteClientState::Terminated,
            TxnFsm::NonInviteClient(fsm) => fsm.state == NonInviteClientState::Terminated,
            TxnFsm::InviteServer(fsm) => fsm.state == InviteServerState::Terminated,
            TxnFsm::NonInviteServer(fsm) => fsm.state == NonInviteServerState::Terminated,
        }
    }

    pub fn on_timer(&mut self, timer: TimerId) -> Vec<TxnAction> {
        match self {
            TxnFsm::InviteClient(fsm) => fsm.on_timer(timer),
            TxnFsm::NonInviteClient(fsm) => fsm.on_timer(timer),
            TxnFsm::InviteServer(fsm) => fsm.on_timer(timer),
            TxnFsm::NonInviteServer(fsm) => fsm.on_timer(timer),
        }
    }

    pub fn on_transport_error(&mut self) -> Vec<TxnAction> {
        match self {
            TxnFsm::InviteClient(fsm) => fsm.on_transport_error(),
            TxnFsm::NonInviteClient(fsm) => fsm.on_transport_error(),
            TxnFsm::InviteServer(fsm) => fsm.on_transport_error(),
            TxnFsm::NonInviteServer(fsm) => fsm.on_transport_error(),
        }
    }
}
