// sipcell - The Sipcell SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Fork state and response aggregation per RFC 3261 §16.7.
//!
//! One [`ForkState`] exists per proxied server transaction. Branches are
//! separate client transactions; the aggregator chooses the best final
//! response in a way that does not depend on arrival order: 6xx beats all,
//! otherwise the lowest class of 3xx/4xx/5xx wins, ties broken by branch
//! index. 2xx responses are never aggregated — every one of them is
//! forwarded upstream the moment it arrives (rule 10), and the remaining
//! branches are cancelled.

use smol_str::SmolStr;
use tracing::{debug, info};

use sipcell_core::{MsgKind, SipMsg, SipUri};

/// Parallel fires every target at once; serial walks them in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkMode {
    Parallel,
    Serial,
}

/// Lifecycle of one fork branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchState {
    /// Queued, not yet launched (serial mode and redirect recursion).
    Unstarted,
    /// Launched, no response yet. CANCEL cannot be sent yet.
    Trying,
    /// A provisional arrived; CANCEL is possible.
    Proceeding,
    /// CANCEL sent, awaiting the final response.
    Cancelled,
    /// Final response received (or branch abandoned).
    Completed,
}

/// One downstream leg of the fork.
#[derive(Debug, Clone)]
pub struct Branch {
    pub target: SipUri,
    pub state: BranchState,
    /// CANCEL requested before any provisional arrived; send it on the
    /// first 1xx.
    pub cancel_pending: bool,
    pub branch_id: Option<SmolStr>,
}

impl Branch {
    fn new(target: SipUri) -> Self {
        Self {
            target,
            state: BranchState::Unstarted,
            cancel_pending: false,
            branch_id: None,
        }
    }

    fn is_live(&self) -> bool {
        matches!(
            self.state,
            BranchState::Trying | BranchState::Proceeding | BranchState::Cancelled
        )
    }
}

/// What the owning cell must do after feeding the fork an event.
#[derive(Debug, Clone)]
pub enum ForkAction {
    /// Create a client transaction for branch `index` toward `target`.
    Launch { index: usize, target: SipUri },
    /// Send CANCEL on branch `index`.
    CancelBranch { index: usize },
    /// Relay this response toward the upstream client.
    ForwardUpstream(SipMsg),
    /// Every branch is terminal; the fork can be dropped.
    Finished,
}

/// Aggregation state for one forked request.
pub struct ForkState {
    /// The request as received (pre-fork), used to synthesize local finals.
    original: SipMsg,
    mode: ForkMode,
    follow_redirects: bool,
    branches: Vec<Branch>,
    /// Best non-2xx final so far: branch index + response.
    best: Option<(usize, SipMsg)>,
    /// Authenticate headers collected from every 401/407 final.
    auth_challenges: Vec<(SmolStr, SmolStr)>,
    any_2xx: bool,
    cancelled: bool,
    finished: bool,
}

impl ForkState {
    pub fn new(
        original: SipMsg,
        targets: Vec<SipUri>,
        mode: ForkMode,
        follow_redirects: bool,
    ) -> Self {
        Self {
            original,
            mode,
            follow_redirects,
            branches: targets.into_iter().map(Branch::new).collect(),
            best: None,
            auth_challenges: Vec::new(),
            any_2xx: false,
            cancelled: false,
            finished: false,
        }
    }

    pub fn branches(&self) -> &[Branch] {
        &self.branches
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// The request this fork is proxying.
    pub fn original(&self) -> &SipMsg {
        &self.original
    }

    /// Records the transaction branch id minted when a leg was launched.
    pub fn record_branch_id(&mut self, index: usize, branch_id: SmolStr) {
        if let Some(branch) = self.branches.get_mut(index) {
            branch.branch_id = Some(branch_id);
        }
    }

    /// Finds the leg a response's Via branch belongs to.
    pub fn branch_index(&self, branch_id: &str) -> Option<usize> {
        self.branches
            .iter()
            .position(|b| b.branch_id.as_deref() == Some(branch_id))
    }

    /// Launches the initial legs.
    pub fn start(&mut self) -> Vec<ForkAction> {
        match self.mode {
            ForkMode::Parallel => {
                let mut actions = Vec::new();
                for index in 0..self.branches.len() {
                    actions.extend(self.launch(index));
                }
                actions
            }
            ForkMode::Serial => self.launch_next_unstarted(),
        }
    }

    fn launch(&mut self, index: usize) -> Vec<ForkAction> {
        let Some(branch) = self.branches.get_mut(index) else {
            return Vec::new();
        };
        if branch.state != BranchState::Unstarted {
            return Vec::new();
        }
        branch.state = BranchState::Trying;
        vec![ForkAction::Launch {
            index,
            target: branch.target.clone(),
        }]
    }

    fn launch_next_unstarted(&mut self) -> Vec<ForkAction> {
        if self.cancelled || self.any_2xx {
            return Vec::new();
        }
        let next = self
            .branches
            .iter()
            .position(|b| b.state == BranchState::Unstarted);
        match next {
            Some(index) => self.launch(index),
            None => Vec::new(),
        }
    }

    /// A provisional response arrived on a leg.
    pub fn on_provisional(&mut self, index: usize, response: SipMsg) -> Vec<ForkAction> {
        let Some(branch) = self.branches.get_mut(index) else {
            return Vec::new();
        };
        if !matches!(branch.state, BranchState::Trying | BranchState::Proceeding) {
            return Vec::new();
        }
        branch.state = BranchState::Proceeding;

        let mut actions = Vec::new();
        if branch.cancel_pending {
            branch.cancel_pending = false;
            branch.state = BranchState::Cancelled;
            actions.push(ForkAction::CancelBranch { index });
        }
        // 100 is hop-by-hop; anything else goes upstream while the fork is
        // still undecided.
        if response.code() != Some(100) && !self.any_2xx && !self.finished {
            actions.push(ForkAction::ForwardUpstream(response));
        }
        actions
    }

    /// A final response arrived on a leg.
    pub fn on_final(&mut self, index: usize, response: SipMsg) -> Vec<ForkAction> {
        if index >= self.branches.len() || self.finished {
            return Vec::new();
        }
        let code = response.code().unwrap_or(0);
        self.branches[index].state = BranchState::Completed;
        let mut actions = Vec::new();
        debug!(index, code, "fork branch completed");

        if (200..300).contains(&code) {
            // Rule 10: every 2xx is forwarded, immediately.
            self.any_2xx = true;
            actions.push(ForkAction::ForwardUpstream(response));
            actions.extend(self.cancel_live_branches());
        } else if (300..400).contains(&code) && self.follow_redirects && !self.cancelled {
            let contacts: Vec<SipUri> = response
                .contacts
                .iter()
                .filter_map(|c| c.sip_uri())
                .cloned()
                .collect();
            if contacts.is_empty() {
                self.consider_best(index, response);
            } else {
                // Recurse: redirect Contacts are tried serially, in the
                // order they were received.
                info!(index, targets = contacts.len(), "following redirect");
                for uri in contacts {
                    self.branches.push(Branch::new(uri));
                }
            }
        } else {
            if code == 401 || code == 407 {
                self.collect_challenges(&response);
            }
            if (600..700).contains(&code) {
                // 6xx is decisive: stop everything else.
                actions.extend(self.cancel_live_branches());
            }
            self.consider_best(index, response);
        }

        if !self.any_2xx && !self.has_live_branches() {
            actions.extend(self.launch_next_unstarted());
        }
        actions.extend(self.finish_if_done());
        actions
    }

    /// Synthesizes a local final for a leg that timed out (Timer C) or hit a
    /// transport error.
    pub fn on_branch_failure(&mut self, index: usize, code: u16) -> Vec<ForkAction> {
        if index >= self.branches.len() || self.branches[index].state == BranchState::Completed {
            return Vec::new();
        }
        let synthesized = self.original.reply(code);
        self.on_final(index, synthesized)
    }

    /// Cancels the whole fork (upstream CANCEL or cell shutdown). Legs
    /// without a provisional yet get cancel-pending and are CANCELled on
    /// their first 1xx.
    pub fn cancel(&mut self) -> Vec<ForkAction> {
        if self.cancelled {
            return Vec::new();
        }
        self.cancelled = true;
        let mut actions = self.cancel_live_branches();
        actions.extend(self.finish_if_done());
        actions
    }

    /// The best final response chosen so far (before upstream transforms).
    pub fn best_response(&self) -> Option<&SipMsg> {
        self.best.as_ref().map(|(_, response)| response)
    }

    fn cancel_live_branches(&mut self) -> Vec<ForkAction> {
        let mut actions = Vec::new();
        for (index, branch) in self.branches.iter_mut().enumerate() {
            match branch.state {
                BranchState::Proceeding => {
                    branch.state = BranchState::Cancelled;
                    actions.push(ForkAction::CancelBranch { index });
                }
                BranchState::Trying => {
                    branch.cancel_pending = true;
                }
                _ => {}
            }
        }
        actions
    }

    fn has_live_branches(&self) -> bool {
        self.branches.iter().any(Branch::is_live)
    }

    fn consider_best(&mut self, index: usize, response: SipMsg) {
        let candidate_rank = (class_rank(&response), index);
        let replace = match &self.best {
            None => true,
            Some((current_index, current)) => {
                candidate_rank < (class_rank(current), *current_index)
            }
        };
        if replace {
            self.best = Some((index, response));
        }
    }

    fn collect_challenges(&mut self, response: &SipMsg) {
        for name in ["WWW-Authenticate", "Proxy-Authenticate"] {
            for value in response.headers.get_all(name) {
                let entry = (SmolStr::new(name), value.clone());
                if !self.auth_challenges.contains(&entry) {
                    self.auth_challenges.push(entry);
                }
            }
        }
    }

    fn finish_if_done(&mut self) -> Vec<ForkAction> {
        if self.finished {
            return Vec::new();
        }
        // Once the fork is decided, queued legs will never launch.
        if self.any_2xx || self.cancelled {
            for branch in &mut self.branches {
                if branch.state == BranchState::Unstarted {
                    branch.state = BranchState::Completed;
                }
            }
        }
        let done = self
            .branches
            .iter()
            .all(|b| b.state == BranchState::Completed);
        if !done {
            return Vec::new();
        }
        self.finished = true;
        let mut actions = Vec::new();
        if !self.any_2xx {
            if let Some(best) = self.emit_best() {
                actions.push(ForkAction::ForwardUpstream(best));
            }
        }
        actions.push(ForkAction::Finished);
        actions
    }

    /// Applies the upstream transforms to the chosen response: 503 maps to
    /// 500, and a 401/407 carries every challenge collected across legs.
    fn emit_best(&self) -> Option<SipMsg> {
        let (_, best) = self.best.as_ref()?;
        let mut upstream = best.clone();
        match upstream.code() {
            Some(503) => {
                upstream.kind = MsgKind::Response {
                    code: 500,
                    reason: SmolStr::new("Server Internal Error"),
                };
            }
            Some(401) | Some(407) => {
                for (name, value) in &self.auth_challenges {
                    let already = upstream
                        .headers
                        .get_all(name.as_str())
                        .any(|existing| existing == value);
                    if !already {
                        upstream.headers.push(name.clone(), value.clone());
                    }
                }
            }
            _ => {}
        }
        Some(upstream)
    }
}

fn class_rank(response: &SipMsg) -> u8 {
    match response.code().unwrap_or(0) / 100 {
        6 => 0,
        3 => 1,
        4 => 2,
        5 => 3,
        _ => 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sipcell_core::ContactValue;
    use sipcell_testkit::{build_invite, respond};

    fn invite() -> SipMsg {
        build_invite("sip:aor@example.com", "z9hG4bKfork", "call-fork")
    }

    fn targets(n: usize) -> Vec<SipUri> {
        (0..n)
            .map(|i| SipUri::parse(&format!("sip:c{i}@192.0.2.{}:5070", i + 1)).unwrap())
            .collect()
    }

    fn final_response(code: u16, tag: &str) -> SipMsg {
        respond(&invite(), code, Some(tag))
    }

    fn forwarded(actions: &[ForkAction]) -> Vec<u16> {
        actions
            .iter()
            .filter_map(|a| match a {
                ForkAction::ForwardUpstream(msg) => msg.code(),
                _ => None,
            })
            .collect()
    }

    fn cancelled_indices(actions: &[ForkAction]) -> Vec<usize> {
        actions
            .iter()
            .filter_map(|a| match a {
                ForkAction::CancelBranch { index } => Some(*index),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn parallel_start_launches_every_leg() {
        let mut fork = ForkState::new(invite(), targets(3), ForkMode::Parallel, false);
        let actions = fork.start();
        let launched: Vec<usize> = actions
            .iter()
            .filter_map(|a| match a {
                ForkAction::Launch { index, .. } => Some(*index),
                _ => None,
            })
            .collect();
        assert_eq!(launched, vec![0, 1, 2]);
    }

    #[test]
    fn serial_start_launches_one_leg_at_a_time() {
        let mut fork = ForkState::new(invite(), targets(2), ForkMode::Serial, false);
        let actions = fork.start();
        assert_eq!(actions.len(), 1);
        assert!(matches!(actions[0], ForkAction::Launch { index: 0, .. }));

        let actions = fork.on_final(0, final_response(486, "t0"));
        assert!(actions
            .iter()
            .any(|a| matches!(a, ForkAction::Launch { index: 1, .. })));
    }

    #[test]
    fn completed_branch_is_not_cancelled_on_2xx_win() {
        // S3 shape: C1 already answered 486, C2 answers 200.
        let mut fork = ForkState::new(invite(), targets(2), ForkMode::Parallel, false);
        fork.start();
        fork.on_final(0, final_response(486, "c1"));
        let actions = fork.on_final(1, final_response(200, "c2"));
        assert_eq!(forwarded(&actions), vec![200]);
        assert!(cancelled_indices(&actions).is_empty());
        assert!(fork.is_finished());
    }

    #[test]
    fn ringing_branch_is_cancelled_on_2xx_win() {
        let mut fork = ForkState::new(invite(), targets(2), ForkMode::Parallel, false);
        fork.start();
        fork.on_provisional(0, final_response(180, "c1"));
        let actions = fork.on_final(1, final_response(200, "c2"));
        assert_eq!(forwarded(&actions), vec![200]);
        assert_eq!(cancelled_indices(&actions), vec![0]);
        // the cancelled leg still completes with its 487
        let actions = fork.on_final(0, final_response(487, "c1"));
        assert!(forwarded(&actions).is_empty());
        assert!(fork.is_finished());
    }

    #[test]
    fn trying_branch_gets_cancel_on_first_provisional() {
        let mut fork = ForkState::new(invite(), targets(2), ForkMode::Parallel, false);
        fork.start();
        // branch 0 has no provisional yet when branch 1 wins
        fork.on_final(1, final_response(200, "c2"));
        // the late 1xx triggers the pended CANCEL
        let actions = fork.on_provisional(0, final_response(180, "c1"));
        assert_eq!(cancelled_indices(&actions), vec![0]);
    }

    #[test]
    fn aggregation_is_arrival_order_independent() {
        let codes = [404u16, 486, 302, 503];
        let permutations: &[[usize; 4]] = &[
            [0, 1, 2, 3],
            [3, 2, 1, 0],
            [2, 0, 3, 1],
            [1, 3, 0, 2],
        ];
        for order in permutations {
            let mut fork = ForkState::new(invite(), targets(4), ForkMode::Parallel, false);
            fork.start();
            let mut upstream = Vec::new();
            for &idx in order {
                let actions = fork.on_final(idx, final_response(codes[idx], "x"));
                upstream.extend(forwarded(&actions));
            }
            // lowest class is the 302, regardless of order
            assert_eq!(upstream, vec![302], "order {order:?}");
            assert!(fork.is_finished());
        }
    }

    #[test]
    fn six_hundred_beats_everything_and_cancels() {
        let mut fork = ForkState::new(invite(), targets(3), ForkMode::Parallel, false);
        fork.start();
        fork.on_provisional(1, final_response(180, "c1"));
        fork.on_final(0, final_response(302, "c0"));
        let actions = fork.on_final(2, final_response(603, "c2"));
        assert_eq!(cancelled_indices(&actions), vec![1]);
        let actions = fork.on_final(1, final_response(487, "c1"));
        assert_eq!(forwarded(&actions), vec![603]);
    }

    #[test]
    fn ties_break_by_branch_index() {
        let mut fork = ForkState::new(invite(), targets(2), ForkMode::Parallel, false);
        fork.start();
        // same class, higher index arrives first
        fork.on_final(1, final_response(404, "b"));
        let actions = fork.on_final(0, final_response(486, "a"));
        assert_eq!(forwarded(&actions), vec![486]);
    }

    #[test]
    fn auth_challenges_are_aggregated() {
        let mut fork = ForkState::new(invite(), targets(2), ForkMode::Parallel, false);
        fork.start();
        let mut challenge_a = final_response(401, "a");
        challenge_a
            .headers
            .push("WWW-Authenticate", "Digest realm=\"a.example.com\", nonce=\"na\"");
        let mut challenge_b = final_response(401, "b");
        challenge_b
            .headers
            .push("WWW-Authenticate", "Digest realm=\"b.example.com\", nonce=\"nb\"");
        fork.on_final(1, challenge_b);
        let actions = fork.on_final(0, challenge_a);
        let upstream = actions
            .iter()
            .find_map(|a| match a {
                ForkAction::ForwardUpstream(msg) => Some(msg),
                _ => None,
            })
            .unwrap();
        let challenges: Vec<_> = upstream.headers.get_all("WWW-Authenticate").collect();
        assert_eq!(challenges.len(), 2);
    }

    #[test]
    fn lone_503_maps_to_500_upstream() {
        let mut fork = ForkState::new(invite(), targets(1), ForkMode::Parallel, false);
        fork.start();
        let actions = fork.on_final(0, final_response(503, "x"));
        assert_eq!(forwarded(&actions), vec![500]);
    }

    #[test]
    fn redirect_recursion_tries_contacts_in_order() {
        let mut fork = ForkState::new(invite(), targets(1), ForkMode::Serial, true);
        fork.start();
        let mut redirect = final_response(302, "r");
        redirect.contacts = vec![
            ContactValue::parse("<sip:first@192.0.2.21>").unwrap(),
            ContactValue::parse("<sip:second@192.0.2.22>").unwrap(),
        ];
        let actions = fork.on_final(0, redirect);
        // the 302 is consumed, the first contact launches
        assert!(forwarded(&actions).is_empty());
        let launch = actions
            .iter()
            .find_map(|a| match a {
                ForkAction::Launch { index, target } => Some((*index, target.clone())),
                _ => None,
            })
            .unwrap();
        assert_eq!(launch.0, 1);
        assert_eq!(launch.1.user.as_deref(), Some("first"));

        // first contact fails, second is tried
        let actions = fork.on_final(1, final_response(486, "r1"));
        let launch = actions
            .iter()
            .find_map(|a| match a {
                ForkAction::Launch { index, target } => Some((*index, target.clone())),
                _ => None,
            })
            .unwrap();
        assert_eq!(launch.1.user.as_deref(), Some("second"));

        // second succeeds
        let actions = fork.on_final(2, final_response(200, "r2"));
        assert_eq!(forwarded(&actions), vec![200]);
    }

    #[test]
    fn cancel_abandons_unstarted_and_pends_trying() {
        let mut fork = ForkState::new(invite(), targets(3), ForkMode::Serial, false);
        fork.start();
        fork.on_provisional(0, final_response(183, "p"));
        let actions = fork.cancel();
        assert_eq!(cancelled_indices(&actions), vec![0]);
        // leg 0 completes with 487; best 487 goes upstream and fork finishes
        let actions = fork.on_final(0, final_response(487, "p"));
        assert_eq!(forwarded(&actions), vec![487]);
        assert!(fork.is_finished());
    }

    #[test]
    fn second_2xx_is_also_forwarded() {
        let mut fork = ForkState::new(invite(), targets(2), ForkMode::Parallel, false);
        fork.start();
        let first = fork.on_final(0, final_response(200, "a"));
        assert_eq!(forwarded(&first), vec![200]);
        let second = fork.on_final(1, final_response(200, "b"));
        assert_eq!(forwarded(&second), vec![200]);
    }

    #[test]
    fn branch_failure_synthesizes_final() {
        let mut fork = ForkState::new(invite(), targets(1), ForkMode::Parallel, false);
        fork.start();
        let actions = fork.on_branch_failure(0, 408);
        assert_eq!(forwarded(&actions), vec![408]);
        assert!(fork.is_finished());
    }
}
