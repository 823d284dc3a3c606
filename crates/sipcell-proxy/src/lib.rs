// sipcell - The Sipcell SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Stateful SIP proxy engine per RFC 3261 §16.
//!
//! Request forwarding ([`forward`]), fork state with §16.7 response
//! aggregation ([`fork`]), and Via-chain loop detection ([`loop_check`]).
//! The engine is a pure state machine: the owning call cell launches client
//! transactions and sends messages in response to the returned actions.

use smol_str::SmolStr;

pub mod fork;
pub mod forward;
pub mod loop_check;

pub use fork::{Branch, BranchState, ForkAction, ForkMode, ForkState};
pub use forward::{prepare_forward, prepare_response_upstream, ForwardError, ProxyIdentity};
pub use loop_check::{detect_loop, fork_fingerprint, mint_branch};

/// Closed option set a route verdict can attach to a proxy operation.
///
/// Unknown options cannot be expressed: the application speaks this type,
/// not ad-hoc key/value lists.
#[derive(Debug, Clone, Default)]
pub struct ProxyOpts {
    /// Insert a Record-Route header so in-dialog requests pass back through.
    pub record_route: bool,
    /// Recurse on 3xx responses, trying their Contacts serially.
    pub follow_redirects: bool,
    /// Add a Path header (RFC 3327) on REGISTER forwarding.
    pub path: bool,
    /// Drop all Route headers before forwarding.
    pub remove_routes: bool,
    /// Add a local Contact when the request carries none.
    pub add_contact: bool,
    /// Force outbound processing on or off rather than negotiating.
    pub outbound: Option<bool>,
    /// Extra headers appended before forwarding.
    pub insert_headers: Vec<(SmolStr, SmolStr)>,
    /// Replace Max-Forwards instead of decrementing.
    pub max_forwards_override: Option<u32>,
}
