// sipcell - The Sipcell SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Dialog layer (RFC 3261 §12).
//!
//! Dialogs are identified by `(Call-ID, local tag, remote tag)` and created
//! by a dialog-forming response: a 1xx carrying a To tag puts the dialog in
//! Early, a 2xx confirms it. The route set is the Record-Route list of the
//! forming response — reversed on the UAC side, kept in received order on
//! the UAS side. Subsequent requests whose Contact differs refresh the
//! remote target; BYE terminates.
//!
//! SUBSCRIBE/NOTIFY usages live as children of their dialog, keyed by the
//! Event header's usage key (RFC 6665).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use smol_str::SmolStr;
use tracing::{debug, info};

use sipcell_core::{EventHeader, Method, NameAddr, SipMsg, SipUri, SubscriptionState};

pub mod storage;

pub use storage::DialogSet;

/// Dialog identifier triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DialogId {
    pub call_id: SmolStr,
    pub local_tag: SmolStr,
    pub remote_tag: SmolStr,
}

/// Dialog lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogState {
    Early,
    Confirmed,
    Terminated,
}

/// Notable transitions surfaced to the owning call cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogEvent {
    Created(DialogId),
    Confirmed(DialogId),
    TargetRefresh(DialogId),
    Terminated(DialogId),
    SubscriptionUpdated { id: DialogId, usage: SmolStr },
}

/// A SUBSCRIBE/NOTIFY usage within a dialog.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub event: EventHeader,
    pub state: SubscriptionState,
    pub expires_at: Option<Instant>,
}

/// A single peer-to-peer dialog.
#[derive(Debug, Clone)]
pub struct Dialog {
    pub id: DialogId,
    pub state: DialogState,
    /// True when the dialog was established over SIPS (RFC 3261 §12.1.1).
    pub secure: bool,
    pub local_seq: u32,
    pub remote_seq: Option<u32>,
    pub local_uri: NameAddr,
    pub remote_uri: NameAddr,
    pub local_target: Option<SipUri>,
    pub remote_target: Option<SipUri>,
    /// Route set for in-dialog requests, first hop first.
    pub route_set: Vec<NameAddr>,
    pub created_at: Instant,
    subscriptions: HashMap<SmolStr, Subscription>,
}

impl Dialog {
    fn new(id: DialogId, local_uri: NameAddr, remote_uri: NameAddr, secure: bool) -> Self {
        Self {
            id,
            state: DialogState::Early,
            secure,
            local_seq: 0,
            remote_seq: None,
            local_uri,
            remote_uri,
            local_target: None,
            remote_target: None,
            route_set: Vec::new(),
            created_at: Instant::now(),
            subscriptions: HashMap::new(),
        }
    }

    /// Allocates the CSeq for the next locally generated in-dialog request.
    pub fn next_local_seq(&mut self) -> u32 {
        self.local_seq = self.local_seq.wrapping_add(1);
        self.local_seq
    }

    /// Validates and records the CSeq of a received in-dialog request.
    ///
    /// Out-of-order requests (lower or equal CSeq) are rejected per RFC 3261
    /// §12.2.2; ACK and CANCEL share the original request's CSeq.
    pub fn accept_remote_seq(&mut self, method: &Method, seq: u32) -> bool {
        if matches!(method, Method::Ack | Method::Cancel) {
            return true;
        }
        match self.remote_seq {
            Some(current) if seq <= current => false,
            _ => {
                self.remote_seq = Some(seq);
                true
            }
        }
    }

    /// Returns the subscription usage for an event key.
    pub fn subscription(&self, usage: &str) -> Option<&Subscription> {
        self.subscriptions.get(usage)
    }

    pub fn subscriptions(&self) -> impl Iterator<Item = (&SmolStr, &Subscription)> {
        self.subscriptions.iter()
    }

    /// Creates or updates a subscription usage from an Event header plus
    /// subscription state.
    pub fn upsert_subscription(
        &mut self,
        event: &EventHeader,
        state: SubscriptionState,
        expires: Option<u32>,
    ) -> SmolStr {
        let usage = event.usage_key();
        let expires_at = expires.map(|secs| Instant::now() + Duration::from_secs(u64::from(secs)));
        let terminated = matches!(state, SubscriptionState::Terminated);
        self.subscriptions.insert(
            usage.clone(),
            Subscription {
                event: event.clone(),
                state,
                expires_at,
            },
        );
        if terminated {
            self.subscriptions.remove(&usage);
        }
        usage
    }

    fn refresh_remote_target(&mut self, msg: &SipMsg) -> bool {
        let Some(contact) = msg.contacts.iter().find_map(|c| c.sip_uri()) else {
            return false;
        };
        let changed = self
            .remote_target
            .as_ref()
            .map(|current| current != contact)
            .unwrap_or(true);
        if changed {
            self.remote_target = Some(contact.clone());
        }
        changed
    }
}

/// Methods that can establish a dialog.
pub fn is_dialog_forming(method: &Method) -> bool {
    matches!(method, Method::Invite | Method::Subscribe | Method::Refer)
}

/// Builds the UAC-side dialog for a dialog-forming response.
///
/// Returns None when the response cannot form a dialog (no To tag, wrong
/// class, or non-forming method).
pub(crate) fn uac_dialog_from(request: &SipMsg, response: &SipMsg) -> Option<Dialog> {
    let code = response.code()?;
    if !(101..300).contains(&code) || !is_dialog_forming(&request.cseq.method) {
        return None;
    }
    let local_tag = request.from_tag()?.clone();
    let remote_tag = response.to_tag()?.clone();
    let id = DialogId {
        call_id: request.call_id.clone(),
        local_tag,
        remote_tag,
    };
    let secure = matches!(request.request_uri()?.as_sip(), Some(uri) if uri.sips);
    let mut dialog = Dialog::new(id, request.from.clone(), response.to.clone(), secure);
    dialog.local_seq = request.cseq.seq;
    // UAC route set: Record-Route of the response, reversed (RFC 3261 §12.1.2).
    dialog.route_set = response.record_routes.iter().rev().cloned().collect();
    dialog.local_target = request.contacts.iter().find_map(|c| c.sip_uri()).cloned();
    dialog.remote_target = response.contacts.iter().find_map(|c| c.sip_uri()).cloned();
    dialog.state = if (200..300).contains(&code) {
        DialogState::Confirmed
    } else {
        DialogState::Early
    };
    Some(dialog)
}

/// Builds the UAS-side dialog when sending a dialog-forming response.
pub(crate) fn uas_dialog_from(request: &SipMsg, response: &SipMsg) -> Option<Dialog> {
    let code = response.code()?;
    if !(101..300).contains(&code) || !is_dialog_forming(&request.cseq.method) {
        return None;
    }
    let local_tag = response.to_tag()?.clone();
    let remote_tag = request.from_tag()?.clone();
    let id = DialogId {
        call_id: request.call_id.clone(),
        local_tag,
        remote_tag,
    };
    let secure = matches!(request.request_uri()?.as_sip(), Some(uri) if uri.sips);
    let mut dialog = Dialog::new(id, response.to.clone(), request.from.clone(), secure);
    dialog.remote_seq = Some(request.cseq.seq);
    // UAS route set: Record-Route of the request, in received order
    // (RFC 3261 §12.1.1).
    dialog.route_set = request.record_routes.clone();
    dialog.local_target = response.contacts.iter().find_map(|c| c.sip_uri()).cloned();
    dialog.remote_target = request.contacts.iter().find_map(|c| c.sip_uri()).cloned();
    dialog.state = if (200..300).contains(&code) {
        DialogState::Confirmed
    } else {
        DialogState::Early
    };
    Some(dialog)
}

pub(crate) fn log_created(dialog: &Dialog) {
    info!(
        call_id = %dialog.id.call_id,
        local_tag = %dialog.id.local_tag,
        remote_tag = %dialog.id.remote_tag,
        state = ?dialog.state,
        "dialog created"
    );
}

pub(crate) fn log_terminated(id: &DialogId, reason: &str) {
    debug!(
        call_id = %id.call_id,
        local_tag = %id.local_tag,
        remote_tag = %id.remote_tag,
        reason,
        "dialog terminated"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use sipcell_testkit::{build_invite, respond};

    #[test]
    fn uac_route_set_is_reversed() {
        let invite = build_invite("sip:bob@example.com", "z9hG4bKd1", "call-d1");
        let mut ok = respond(&invite, 200, Some("remote1"));
        ok.record_routes = vec![
            NameAddr::parse("<sip:p1.example.com;lr>").unwrap(),
            NameAddr::parse("<sip:p2.example.com;lr>").unwrap(),
        ];
        let dialog = uac_dialog_from(&invite, &ok).unwrap();
        assert_eq!(dialog.state, DialogState::Confirmed);
        let hosts: Vec<_> = dialog
            .route_set
            .iter()
            .map(|r| r.sip_uri().unwrap().host.as_str())
            .collect();
        assert_eq!(hosts, vec!["p2.example.com", "p1.example.com"]);
    }

    #[test]
    fn uas_route_set_keeps_order() {
        let mut invite = build_invite("sip:bob@example.com", "z9hG4bKd2", "call-d2");
        invite.record_routes = vec![
            NameAddr::parse("<sip:p1.example.com;lr>").unwrap(),
            NameAddr::parse("<sip:p2.example.com;lr>").unwrap(),
        ];
        let ok = respond(&invite, 200, Some("local1"));
        let dialog = uas_dialog_from(&invite, &ok).unwrap();
        let hosts: Vec<_> = dialog
            .route_set
            .iter()
            .map(|r| r.sip_uri().unwrap().host.as_str())
            .collect();
        assert_eq!(hosts, vec!["p1.example.com", "p2.example.com"]);
    }

    #[test]
    fn early_dialog_from_tagged_1xx() {
        let invite = build_invite("sip:bob@example.com", "z9hG4bKd3", "call-d3");
        let ringing = respond(&invite, 180, Some("remote3"));
        let dialog = uac_dialog_from(&invite, &ringing).unwrap();
        assert_eq!(dialog.state, DialogState::Early);
    }

    #[test]
    fn untagged_1xx_forms_no_dialog() {
        let invite = build_invite("sip:bob@example.com", "z9hG4bKd4", "call-d4");
        let trying = respond(&invite, 100, None);
        assert!(uac_dialog_from(&invite, &trying).is_none());
    }

    #[test]
    fn non_forming_method_is_ignored() {
        let mut options = build_invite("sip:bob@example.com", "z9hG4bKd5", "call-d5");
        options.kind = sipcell_core::MsgKind::Request {
            method: Method::Options,
            uri: sipcell_core::Uri::parse("sip:bob@example.com").unwrap(),
        };
        options.cseq.method = Method::Options;
        let ok = respond(&options, 200, Some("remote5"));
        assert!(uac_dialog_from(&options, &ok).is_none());
    }

    #[test]
    fn remote_seq_must_increase() {
        let invite = build_invite("sip:bob@example.com", "z9hG4bKd6", "call-d6");
        let ok = respond(&invite, 200, Some("remote6"));
        let mut dialog = uas_dialog_from(&invite, &ok).unwrap();
        assert!(!dialog.accept_remote_seq(&Method::Bye, 1));
        assert!(dialog.accept_remote_seq(&Method::Bye, 2));
        assert!(!dialog.accept_remote_seq(&Method::Bye, 2));
        // ACK reuses the INVITE CSeq
        assert!(dialog.accept_remote_seq(&Method::Ack, 1));
    }

    #[test]
    fn subscription_usages_upsert_and_terminate() {
        let invite = build_invite("sip:bob@example.com", "z9hG4bKd7", "call-d7");
        let ok = respond(&invite, 200, Some("remote7"));
        let mut dialog = uac_dialog_from(&invite, &ok).unwrap();
        let event = EventHeader::parse("refer").unwrap();
        let usage = dialog.upsert_subscription(&event, SubscriptionState::Active, Some(60));
        assert!(dialog.subscription(&usage).is_some());
        dialog.upsert_subscription(&event, SubscriptionState::Terminated, None);
        assert!(dialog.subscription(&usage).is_none());
    }
}
