// sipcell - The Sipcell SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! RFC 3261 §17 transaction layer: the four state machines, their timers,
//! and the per-call transaction set.
//!
//! Each FSM is a pure function of `(state, event) -> actions`; the owning
//! call cell executes the actions (transmit, schedule, deliver) and feeds
//! timer firings back in. Transactions are never shared across calls.

use sha2::{Digest, Sha256};
use sipcell_core::{has_magic_cookie, Method, SipMsg};
use smol_str::SmolStr;

pub mod fsm;
pub mod metrics;
pub mod store;
pub mod timers;

pub use fsm::{
    InviteClientFsm, InviteClientState, InviteServerFsm, InviteServerState, NonInviteClientFsm,
    NonInviteClientState, NonInviteServerFsm, NonInviteServerState, TxnAction, TxnFsm,
};
pub use metrics::{MetricsSnapshot, TransactionMetrics};
pub use store::{TransactionEntry, TransactionLimits, TransactionSet};
pub use timers::{TimerDefaults, TimerId, TransportTimers};

/// Which of the four RFC 3261 §17 machines a transaction runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxnRole {
    InviteClient,
    NonInviteClient,
    InviteServer,
    NonInviteServer,
}

impl TxnRole {
    pub fn is_server(self) -> bool {
        matches!(self, TxnRole::InviteServer | TxnRole::NonInviteServer)
    }

    pub fn is_invite(self) -> bool {
        matches!(self, TxnRole::InviteClient | TxnRole::InviteServer)
    }
}

/// Unique key identifying a transaction: branch, CSeq method, role.
///
/// The branch of the topmost Via is the primary identifier (RFC 3261
/// §17.2.3); when it lacks the magic cookie the legacy tuple match is
/// collapsed into a synthetic branch so the rest of the stack only ever
/// deals in keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionKey {
    pub branch: SmolStr,
    pub method: Method,
    pub role: TxnRole,
}

impl TransactionKey {
    pub fn new(branch: impl Into<SmolStr>, method: Method, role: TxnRole) -> Self {
        Self {
            branch: branch.into(),
            method,
            role,
        }
    }

    /// Derives the key a message belongs to, on the given side.
    ///
    /// ACK and CANCEL requests map onto the INVITE server transaction's
    /// method so they find the matching entry (CANCEL additionally owns its
    /// separate non-INVITE transaction, which the call cell creates with
    /// [`TransactionKey::new`]).
    pub fn from_msg(msg: &SipMsg, server_side: bool) -> Option<Self> {
        let method = match msg.method() {
            Method::Ack => Method::Invite,
            other => other.clone(),
        };
        let role = match (server_side, &method) {
            (true, Method::Invite) => TxnRole::InviteServer,
            (true, _) => TxnRole::NonInviteServer,
            (false, Method::Invite) => TxnRole::InviteClient,
            (false, _) => TxnRole::NonInviteClient,
        };
        let branch = effective_branch(msg)?;
        Some(Self {
            branch,
            method,
            role,
        })
    }

    /// Key of the INVITE server transaction a CANCEL targets.
    pub fn cancel_target(&self) -> TransactionKey {
        TransactionKey {
            branch: self.branch.clone(),
            method: Method::Invite,
            role: TxnRole::InviteServer,
        }
    }
}

/// Branch used for matching: the topmost Via's branch when it carries the
/// magic cookie, otherwise a synthetic digest of the RFC 2543 legacy tuple.
pub fn effective_branch(msg: &SipMsg) -> Option<SmolStr> {
    let via = msg.top_via()?;
    if let Some(branch) = via.branch() {
        if has_magic_cookie(branch) {
            return Some(branch.clone());
        }
    }
    // Legacy match (RFC 3261 §17.2.3 fallback): sent-by, Call-ID, CSeq,
    // From tag, and the request target collapsed into one token.
    let mut hasher = Sha256::new();
    hasher.update(via.sent_by().as_bytes());
    hasher.update(msg.call_id.as_bytes());
    hasher.update(msg.cseq.seq.to_be_bytes());
    hasher.update(msg.cseq.method.as_str().as_bytes());
    if let Some(tag) = msg.from_tag() {
        hasher.update(tag.as_bytes());
    }
    if let Some(branch) = via.branch() {
        hasher.update(branch.as_bytes());
    }
    let digest = hasher.finalize();
    let mut token = String::with_capacity(7 + 16);
    token.push_str("legacy-");
    for byte in &digest[..8] {
        token.push_str(&format!("{byte:02x}"));
    }
    Some(SmolStr::new(token))
}

/// Generates a fresh RFC 3261 magic-cookie branch identifier.
pub fn generate_branch() -> SmolStr {
    use rand::{distributions::Alphanumeric, Rng};
    let mut rng = rand::thread_rng();
    let suffix: String = (&mut rng)
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect();
    SmolStr::new(format!("z9hG4bK{suffix}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sipcell_core::{NameAddr, SipUri, Uri, ViaHeader};

    fn request(method: Method, branch: Option<&str>) -> SipMsg {
        let mut msg = SipMsg::new_request(
            method,
            Uri::Sip(SipUri::parse("sip:bob@example.com").unwrap()),
            "call-x",
            NameAddr::parse("<sip:alice@example.com>;tag=f1").unwrap(),
            NameAddr::parse("<sip:bob@example.com>").unwrap(),
            7,
        );
        let via = match branch {
            Some(branch) => format!("SIP/2.0/UDP host.example.com;branch={branch}"),
            None => "SIP/2.0/UDP host.example.com".to_string(),
        };
        msg.vias.push(ViaHeader::parse(&via).unwrap());
        msg
    }

    #[test]
    fn cookie_branch_is_used_directly() {
        let msg = request(Method::Invite, Some("z9hG4bKabc"));
        let key = TransactionKey::from_msg(&msg, true).unwrap();
        assert_eq!(key.branch.as_str(), "z9hG4bKabc");
        assert_eq!(key.role, TxnRole::InviteServer);
    }

    #[test]
    fn legacy_branch_is_synthesized_and_stable() {
        let msg = request(Method::Invite, Some("oldstyle"));
        let key1 = TransactionKey::from_msg(&msg, true).unwrap();
        let key2 = TransactionKey::from_msg(&msg, true).unwrap();
        assert!(key1.branch.starts_with("legacy-"));
        assert_eq!(key1, key2);

        let other = request(Method::Invite, Some("otherold"));
        let key3 = TransactionKey::from_msg(&other, true).unwrap();
        assert_ne!(key1.branch, key3.branch);
    }

    #[test]
    fn ack_maps_to_invite_server_key() {
        let invite = request(Method::Invite, Some("z9hG4bKabc"));
        let ack = request(Method::Ack, Some("z9hG4bKabc"));
        assert_eq!(
            TransactionKey::from_msg(&invite, true),
            TransactionKey::from_msg(&ack, true)
        );
    }

    #[test]
    fn cancel_gets_its_own_key_but_targets_invite() {
        let cancel = request(Method::Cancel, Some("z9hG4bKabc"));
        let key = TransactionKey::from_msg(&cancel, true).unwrap();
        assert_eq!(key.method, Method::Cancel);
        assert_eq!(key.role, TxnRole::NonInviteServer);
        let target = key.cancel_target();
        assert_eq!(target.method, Method::Invite);
        assert_eq!(target.role, TxnRole::InviteServer);
        assert_eq!(target.branch, key.branch);
    }

    #[test]
    fn generated_branches_carry_cookie() {
        let branch = generate_branch();
        assert!(has_magic_cookie(&branch));
        assert_ne!(generate_branch(), branch);
    }
}
