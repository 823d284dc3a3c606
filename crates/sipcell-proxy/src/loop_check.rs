// sipcell - The Sipcell SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Loop detection per RFC 3261 §16.6 step 8 / §16.3 step 4.
//!
//! The branch this proxy mints embeds a fingerprint of the routing-relevant
//! request state. A request that loops back arrives with our Via still in
//! its chain; if that Via's fingerprint equals the fingerprint of the
//! request as it stands now, forwarding it again would loop forever: 482.
//! (A spiral — same proxy, different Request-URI — yields a different
//! fingerprint and is allowed.)

use sha2::{Digest, Sha256};
use smol_str::SmolStr;

use sipcell_core::{SipMsg, MAGIC_COOKIE};

/// Separates the fingerprint from the per-branch entropy inside a branch.
const FINGERPRINT_SEP: char = '.';

/// Computes the fork fingerprint of a request: Request-URI, topmost Via
/// branch, tags, Call-ID, CSeq, and Proxy-Require.
pub fn fork_fingerprint(msg: &SipMsg) -> SmolStr {
    let mut hasher = Sha256::new();
    if let Some(uri) = msg.request_uri() {
        hasher.update(uri.to_string().as_bytes());
    }
    if let Some(branch) = msg.top_branch() {
        hasher.update(branch.as_bytes());
    }
    if let Some(tag) = msg.to_tag() {
        hasher.update(tag.as_bytes());
    }
    if let Some(tag) = msg.from_tag() {
        hasher.update(tag.as_bytes());
    }
    hasher.update(msg.call_id.as_bytes());
    hasher.update(msg.cseq.seq.to_be_bytes());
    hasher.update(msg.cseq.method.as_str().as_bytes());
    for value in msg.headers.get_all("Proxy-Require") {
        hasher.update(value.as_bytes());
    }
    let digest = hasher.finalize();
    let mut fingerprint = String::with_capacity(16);
    for byte in &digest[..8] {
        fingerprint.push_str(&format!("{byte:02x}"));
    }
    SmolStr::new(fingerprint)
}

/// Mints a branch embedding the fingerprint plus fresh entropy, so parallel
/// fork branches stay unique while loop checks stay possible.
pub fn mint_branch(fingerprint: &str) -> SmolStr {
    use rand::{distributions::Alphanumeric, Rng};
    let mut rng = rand::thread_rng();
    let entropy: String = (&mut rng)
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    SmolStr::new(format!("{MAGIC_COOKIE}{fingerprint}{FINGERPRINT_SEP}{entropy}"))
}

/// Extracts the fingerprint part of a branch we minted, if it is one.
fn branch_fingerprint(branch: &str) -> Option<&str> {
    let rest = branch.strip_prefix(MAGIC_COOKIE)?;
    let (fingerprint, _) = rest.split_once(FINGERPRINT_SEP)?;
    Some(fingerprint)
}

/// Checks the Via chain for a loop through this proxy.
///
/// True when any Via names `local_host` and carries a branch whose embedded
/// fingerprint equals the request's current fingerprint.
pub fn detect_loop(msg: &SipMsg, local_host: &str) -> bool {
    let current = fork_fingerprint(msg);
    msg.vias.iter().any(|via| {
        via.sent_by_host.as_str() == local_host
            && via
                .branch()
                .and_then(|branch| branch_fingerprint(branch))
                .map(|fingerprint| fingerprint == current.as_str())
                .unwrap_or(false)
    })
}
