// sipcell - The Sipcell SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Location store port and the default in-memory backend.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use smol_str::SmolStr;

use sipcell_core::{NameAddr, SipUri};

/// Identifies one binding under an AOR: instance key plus outbound reg-id.
///
/// At most one active contact may exist per key (RFC 5626 §6).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct BindingKey {
    /// Hash of `+sip.instance`, empty for instanceless contacts.
    pub instance: SmolStr,
    pub reg_id: Option<u32>,
}

/// One stored registration binding.
#[derive(Debug, Clone)]
pub struct StoredBinding {
    pub key: BindingKey,
    /// Contact as registered, echoed back in responses.
    pub addr: NameAddr,
    pub uri: SipUri,
    pub call_id: SmolStr,
    pub cseq: u32,
    pub q: f32,
    pub expires_at: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
    /// Stable `gr` token; empty when the contact has no instance.
    pub pub_gruu_token: SmolStr,
    /// Opaque tokens of the temporary GRUUs minted under the current
    /// Call-ID, oldest first.
    pub temp_gruu_tokens: Vec<SmolStr>,
}

impl StoredBinding {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Storage port for the registrar.
///
/// The registrar actor is the only writer; backends must only provide
/// consistent point reads per AOR.
pub trait RegStore: Send + Sync + 'static {
    /// All bindings currently stored for the AOR, in insertion order.
    fn get(&self, aor: &str) -> Vec<StoredBinding>;
    /// Inserts or replaces the binding with the same key. `ttl` is advisory
    /// for backends with native expiry.
    fn put(&self, aor: &str, binding: StoredBinding, ttl: Duration);
    /// Removes one binding; true when something was removed.
    fn del(&self, aor: &str, key: &BindingKey) -> bool;
    /// Removes every binding for the AOR.
    fn del_all(&self, aor: &str);
    /// AORs with at least one stored binding (live or not).
    fn aors(&self) -> Vec<SmolStr>;
}

impl RegStore for Box<dyn RegStore> {
    fn get(&self, aor: &str) -> Vec<StoredBinding> {
        (**self).get(aor)
    }

    fn put(&self, aor: &str, binding: StoredBinding, ttl: Duration) {
        (**self).put(aor, binding, ttl)
    }

    fn del(&self, aor: &str, key: &BindingKey) -> bool {
        (**self).del(aor, key)
    }

    fn del_all(&self, aor: &str) {
        (**self).del_all(aor)
    }

    fn aors(&self) -> Vec<SmolStr> {
        (**self).aors()
    }
}

/// DashMap-backed store, the default backend.
#[derive(Default)]
pub struct MemoryRegStore {
    bindings: DashMap<SmolStr, Vec<StoredBinding>>,
}

impl MemoryRegStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RegStore for MemoryRegStore {
    fn get(&self, aor: &str) -> Vec<StoredBinding> {
        self.bindings
            .get(aor)
            .map(|entry| entry.clone())
            .unwrap_or_default()
    }

    fn put(&self, aor: &str, binding: StoredBinding, _ttl: Duration) {
        let mut entry = self.bindings.entry(SmolStr::new(aor)).or_default();
        match entry.iter_mut().find(|b| b.key == binding.key) {
            Some(slot) => *slot = binding,
            None => entry.push(binding),
        }
    }

    fn del(&self, aor: &str, key: &BindingKey) -> bool {
        let Some(mut entry) = self.bindings.get_mut(aor) else {
            return false;
        };
        let before = entry.len();
        entry.retain(|b| &b.key != key);
        let removed = entry.len() < before;
        drop(entry);
        self.prune_empty(aor);
        removed
    }

    fn del_all(&self, aor: &str) {
        self.bindings.remove(aor);
    }

    fn aors(&self) -> Vec<SmolStr> {
        self.bindings.iter().map(|e| e.key().clone()).collect()
    }
}

impl MemoryRegStore {
    fn prune_empty(&self, aor: &str) {
        if let Some(entry) = self.bindings.get(aor) {
            if entry.is_empty() {
                drop(entry);
                self.bindings.remove(aor);
            }
        }
    }
}
