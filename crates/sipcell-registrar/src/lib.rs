// sipcell - The Sipcell SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! RFC 3261 §10 REGISTER handling and location service, with GRUU
//! (RFC 5627) and outbound (RFC 5626) registration rules.
//!
//! The registrar owns its store: all writes go through [`Registrar`], reads
//! may go through the store port directly. Bindings are keyed by
//! `(instance, reg-id)`; a re-register with the same key replaces the
//! binding in place. Each instanced binding carries a stable public GRUU
//! and a rolling set of temporary GRUUs valid only for the current Call-ID.
//!
//! # Example
//! ```no_run
//! use std::sync::Arc;
//! use sipcell_registrar::{MemoryRegStore, Registrar, RegistrarConfig};
//! # async fn example(request: sipcell_core::SipMsg) {
//! let registrar = Registrar::new(MemoryRegStore::new(), None, RegistrarConfig::default());
//! let response = registrar.handle_register(&request).await;
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use smol_str::SmolStr;
use tracing::{debug, info, warn};

use sipcell_core::{params, ContactValue, Method, NameAddr, SipMsg, SipUri};

pub mod gruu;
pub mod store;

pub use store::{BindingKey, MemoryRegStore, RegStore, StoredBinding};

/// Authentication port consulted before any registration change.
///
/// Digest computation lives outside the core; the registrar only relays
/// the challenge.
#[async_trait]
pub trait Authenticator: Send + Sync + 'static {
    async fn check(&self, request: &SipMsg) -> AuthOutcome;
}

/// Outcome of an authentication check.
#[derive(Debug, Clone)]
pub enum AuthOutcome {
    Ok,
    /// Challenge with 401 or 407 and the authenticate header parameters.
    Challenge { code: u16, params: SmolStr },
}

/// Registrar tunables.
#[derive(Debug, Clone)]
pub struct RegistrarConfig {
    /// Expiry applied when neither the contact nor the request names one.
    pub default_expires: u32,
    /// Whether this hop supports outbound (RFC 5626) flows.
    pub outbound_supported: bool,
    /// Period of the background expiry sweep.
    pub sweep_interval: Duration,
}

impl Default for RegistrarConfig {
    fn default() -> Self {
        Self {
            default_expires: 3600,
            outbound_supported: true,
            sweep_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
struct GruuRef {
    aor: SmolStr,
    key: BindingKey,
}

/// The registrar: binding writes, lookups, and GRUU resolution.
pub struct Registrar<S: RegStore> {
    store: S,
    auth: Option<Arc<dyn Authenticator>>,
    config: RegistrarConfig,
    /// gr/opaque token -> owning binding, maintained on every write.
    gruu_index: DashMap<SmolStr, GruuRef>,
}

impl<S: RegStore> Registrar<S> {
    pub fn new(store: S, auth: Option<Arc<dyn Authenticator>>, config: RegistrarConfig) -> Self {
        Self {
            store,
            auth,
            config,
            gruu_index: DashMap::new(),
        }
    }

    pub fn config(&self) -> &RegistrarConfig {
        &self.config
    }

    /// Processes a REGISTER request, returning the response to send.
    pub async fn handle_register(&self, request: &SipMsg) -> SipMsg {
        debug_assert_eq!(request.method(), &Method::Register);

        if let Some(auth) = &self.auth {
            if let AuthOutcome::Challenge { code, params } = auth.check(request).await {
                let mut response = request.reply(code);
                let header = if code == 407 {
                    "Proxy-Authenticate"
                } else {
                    "WWW-Authenticate"
                };
                response.headers.push(header, params);
                return response;
            }
        }

        let Some(aor) = aor_of(&request.to) else {
            return request.reply_with_reason(400, "Invalid AOR");
        };
        let now = Utc::now();
        self.prune_expired(&aor, now);

        // Wildcard deregistration: Contact: * with Expires: 0 only.
        if request.contacts.iter().any(|c| *c == ContactValue::Star) {
            if request.contacts.len() != 1 || request.expires != Some(0) {
                return request.reply_with_reason(400, "Invalid wildcard Contact");
            }
            for binding in self.store.get(&aor) {
                self.unindex(&binding);
            }
            self.store.del_all(&aor);
            info!(aor = %aor, "all bindings removed");
            return request.reply(200);
        }

        for contact in &request.contacts {
            if let Err(response) = self.apply_contact(request, &aor, contact, now) {
                return *response;
            }
        }

        let mut response = request.reply(200);
        response.contacts = self
            .store
            .get(&aor)
            .iter()
            .filter(|b| b.is_live(now))
            .map(|b| self.echo_contact(&aor, b, now))
            .collect();
        response
    }

    /// Applies a single Contact of a REGISTER. Errors carry the response
    /// to send instead.
    fn apply_contact(
        &self,
        request: &SipMsg,
        aor: &SmolStr,
        contact: &ContactValue,
        now: DateTime<Utc>,
    ) -> Result<(), Box<SipMsg>> {
        let Some(addr) = contact.addr() else {
            return Err(Box::new(
                request.reply_with_reason(400, "Invalid wildcard Contact"),
            ));
        };
        let Some(uri) = addr.sip_uri() else {
            return Err(Box::new(request.reply_with_reason(400, "Invalid Contact")));
        };
        // Registering a GRUU as a contact would alias the binding space.
        if gruu::is_gruu(uri) {
            return Err(Box::new(
                request.reply_with_reason(403, "Contact is a GRUU"),
            ));
        }

        let instance = contact.instance();
        let reg_id = contact.reg_id();
        if reg_id.is_some() && (instance.is_none() || !self.config.outbound_supported) {
            return Err(Box::new(request.reply(439)));
        }

        let instance_key = match &instance {
            Some(instance) => gruu::instance_key(instance),
            None => SmolStr::default(),
        };
        let key = BindingKey {
            // Instanceless contacts bind by their URI so they never collide.
            instance: if instance_key.is_empty() {
                SmolStr::new(uri.to_string())
            } else {
                instance_key.clone()
            },
            reg_id,
        };

        let existing = self
            .store
            .get(aor)
            .into_iter()
            .find(|binding| binding.key == key);
        if let Some(old) = &existing {
            if old.call_id == request.call_id && request.cseq.seq <= old.cseq {
                warn!(aor = %aor, cseq = request.cseq.seq, "stale REGISTER CSeq");
                return Err(Box::new(request.reply_with_reason(400, "Stale CSeq")));
            }
        }

        let expires = contact
            .expires()
            .or(request.expires)
            .unwrap_or(self.config.default_expires);
        if expires == 0 {
            if let Some(old) = existing {
                self.unindex(&old);
                self.store.del(aor, &old.key);
                info!(aor = %aor, contact = %old.uri, "binding removed");
            }
            return Ok(());
        }

        // GRUU bookkeeping: the public token is stable, the temporary set
        // rolls. Same Call-ID extends the set; a new Call-ID invalidates
        // every prior temporary GRUU for the instance.
        let mut pub_gruu_token = SmolStr::default();
        let mut temp_gruu_tokens = Vec::new();
        if !instance_key.is_empty() {
            pub_gruu_token = gruu::gr_token(aor, &instance_key);
            let (_, fresh_opaque) = gruu::mint_temp_gruu(&domain_of(aor));
            match &existing {
                Some(old) if old.call_id == request.call_id => {
                    temp_gruu_tokens = old.temp_gruu_tokens.clone();
                }
                Some(old) => {
                    for token in &old.temp_gruu_tokens {
                        self.gruu_index.remove(token);
                    }
                    debug!(aor = %aor, "temporary GRUUs invalidated by Call-ID change");
                }
                None => {}
            }
            temp_gruu_tokens.push(fresh_opaque);
        }

        let binding = StoredBinding {
            key: key.clone(),
            addr: stripped_addr(addr),
            uri: uri.clone(),
            call_id: request.call_id.clone(),
            cseq: request.cseq.seq,
            q: contact.q_value(),
            expires_at: now + ChronoDuration::seconds(i64::from(expires)),
            registered_at: now,
            pub_gruu_token: pub_gruu_token.clone(),
            temp_gruu_tokens: temp_gruu_tokens.clone(),
        };

        let gruu_ref = GruuRef {
            aor: aor.clone(),
            key: key.clone(),
        };
        if !pub_gruu_token.is_empty() {
            self.gruu_index.insert(pub_gruu_token, gruu_ref.clone());
        }
        for token in &temp_gruu_tokens {
            self.gruu_index.insert(token.clone(), gruu_ref.clone());
        }

        self.store
            .put(aor, binding, Duration::from_secs(u64::from(expires)));
        info!(aor = %aor, contact = %uri, expires, "binding stored");
        Ok(())
    }

    /// Live contacts for an AOR: highest q first, most recent first within
    /// equal q. Expired bindings are dropped on read.
    pub fn find(&self, aor: &str) -> Vec<StoredBinding> {
        let now = Utc::now();
        self.prune_expired(aor, now);
        let mut bindings: Vec<StoredBinding> = self
            .store
            .get(aor)
            .into_iter()
            .filter(|b| b.is_live(now))
            .collect();
        bindings.sort_by(|a, b| {
            b.q.partial_cmp(&a.q)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.registered_at.cmp(&a.registered_at))
        });
        bindings
    }

    /// Resolves a GRUU (public or temporary) to its single active binding.
    pub fn find_gruu(&self, uri: &SipUri) -> Option<StoredBinding> {
        let gruu_ref = match gruu::gr_value(uri) {
            // public GRUU: gr carries the token
            Some(token) => self.gruu_index.get(token.as_str())?.clone(),
            // temporary GRUU: valueless gr, the user part is the opaque
            None if gruu::is_gruu(uri) => {
                let opaque = uri.user.as_ref()?;
                self.gruu_index.get(opaque.as_str())?.clone()
            }
            None => return None,
        };
        let now = Utc::now();
        self.store
            .get(&gruu_ref.aor)
            .into_iter()
            .find(|binding| binding.key == gruu_ref.key && binding.is_live(now))
    }

    /// Removes expired bindings everywhere. Returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let now = Utc::now();
        let mut removed = 0;
        for aor in self.store.aors() {
            removed += self.prune_expired(&aor, now);
        }
        if removed > 0 {
            debug!(removed, "expired bindings swept");
        }
        removed
    }

    /// Spawns the periodic sweep task.
    pub fn spawn_sweeper(registrar: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let period = registrar.config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                registrar.sweep();
            }
        })
    }

    fn prune_expired(&self, aor: &str, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        for binding in self.store.get(aor) {
            if !binding.is_live(now) {
                self.unindex(&binding);
                self.store.del(aor, &binding.key);
                removed += 1;
            }
        }
        removed
    }

    fn unindex(&self, binding: &StoredBinding) {
        if !binding.pub_gruu_token.is_empty() {
            self.gruu_index.remove(&binding.pub_gruu_token);
        }
        for token in &binding.temp_gruu_tokens {
            self.gruu_index.remove(token);
        }
    }

    /// Builds the response Contact for a stored binding: the registered
    /// address plus `expires`, `pub-gruu`, and `temp-gruu` parameters.
    fn echo_contact(&self, aor: &str, binding: &StoredBinding, now: DateTime<Utc>) -> ContactValue {
        let mut addr = binding.addr.clone();
        let remaining = (binding.expires_at - now).num_seconds().max(0);
        params::set_param(
            &mut addr.params,
            "expires",
            Some(SmolStr::new(remaining.to_string())),
        );
        if !binding.pub_gruu_token.is_empty() {
            let domain = domain_of(aor);
            let pub_uri = gruu::mint_pub_gruu(user_of(aor), &domain, &binding.pub_gruu_token);
            params::set_param(
                &mut addr.params,
                "pub-gruu",
                Some(SmolStr::new(format!("\"{pub_uri}\""))),
            );
            if let Some(opaque) = binding.temp_gruu_tokens.last() {
                let temp_uri = SipUri::new(domain)
                    .with_user(opaque.clone())
                    .with_param("gr", None);
                params::set_param(
                    &mut addr.params,
                    "temp-gruu",
                    Some(SmolStr::new(format!("\"{temp_uri}\""))),
                );
            }
        }
        ContactValue::Addr(addr)
    }
}

/// Canonical AOR of a To header: `scheme:user@host`, host lowercased,
/// parameters stripped.
fn aor_of(to: &NameAddr) -> Option<SmolStr> {
    let uri = to.sip_uri()?;
    let scheme = uri.scheme();
    Some(match &uri.user {
        Some(user) => SmolStr::new(format!("{scheme}:{user}@{}", uri.host)),
        None => SmolStr::new(format!("{scheme}:{}", uri.host)),
    })
}

fn domain_of(aor: &str) -> String {
    aor.rsplit_once('@')
        .map(|(_, domain)| domain.to_string())
        .unwrap_or_else(|| aor.split_once(':').map(|(_, rest)| rest.to_string()).unwrap_or_default())
}

fn user_of(aor: &str) -> Option<&str> {
    let rest = aor.split_once(':')?.1;
    rest.rsplit_once('@').map(|(user, _)| user)
}

/// The echoed Contact drops parameters the registrar owns (expiry and GRUU
/// parameters are recomputed per response).
fn stripped_addr(addr: &NameAddr) -> NameAddr {
    let mut addr = addr.clone();
    for name in ["expires", "pub-gruu", "temp-gruu"] {
        params::remove_param(&mut addr.params, name);
    }
    addr
}
