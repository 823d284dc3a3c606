// sipcell - The Sipcell SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-call transaction storage.
//!
//! A [`TransactionSet`] is owned by exactly one call cell; it maps keys to
//! live machines, schedules timers as messages back to the owning cell's
//! mailbox, and enforces per-call transaction caps.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::{
    fsm::TxnFsm,
    metrics::{MetricsSnapshot, TransactionMetrics},
    timers::TimerId,
    TransactionKey,
};

/// Caps on live transactions per call, oldest evicted first.
///
/// A runaway peer minting fresh branches would otherwise grow the maps
/// without bound.
#[derive(Debug, Clone, Copy)]
pub struct TransactionLimits {
    pub max_server: usize,
    pub max_client: usize,
}

impl Default for TransactionLimits {
    fn default() -> Self {
        Self {
            max_server: 128,
            max_client: 128,
        }
    }
}

/// A live transaction: its machine plus the cancellation handles of its
/// pending timers.
pub struct TransactionEntry {
    pub key: TransactionKey,
    pub fsm: TxnFsm,
    pub created_at: Instant,
    timers: HashMap<TimerId, oneshot::Sender<()>>,
}

impl TransactionEntry {
    fn cancel_all_timers(&mut self) {
        for (_, cancel) in self.timers.drain() {
            let _ = cancel.send(());
        }
    }
}

/// Timer firing delivered to the owning cell's mailbox.
pub type TimerFire = (TransactionKey, TimerId);

/// The set of transactions owned by one call cell.
pub struct TransactionSet {
    entries: HashMap<TransactionKey, TransactionEntry>,
    timer_tx: mpsc::Sender<TimerFire>,
    limits: TransactionLimits,
    metrics: TransactionMetrics,
}

impl TransactionSet {
    pub fn new(timer_tx: mpsc::Sender<TimerFire>, limits: TransactionLimits) -> Self {
        Self {
            entries: HashMap::new(),
            timer_tx,
            limits,
            metrics: TransactionMetrics::new(),
        }
    }

    /// Lifecycle counters for this set.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &TransactionKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &TransactionKey) -> Option<&TransactionEntry> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &TransactionKey) -> Option<&mut TransactionEntry> {
        self.entries.get_mut(key)
    }

    /// Inserts a new transaction.
    ///
    /// Returns `false` without inserting when the key is already live: no two
    /// transactions may share `(branch, method, role)` within one call.
    pub fn insert(&mut self, key: TransactionKey, fsm: TxnFsm) -> bool {
        if self.entries.contains_key(&key) {
            warn!(?key, "duplicate transaction key rejected");
            return false;
        }
        self.evict_if_full(key.role.is_server());
        self.metrics.record_created(key.role.is_server());
        self.entries.insert(
            key.clone(),
            TransactionEntry {
                key,
                fsm,
                created_at: Instant::now(),
                timers: HashMap::new(),
            },
        );
        true
    }

    /// Arms a timer for the transaction; a previously armed timer with the
    /// same id is cancelled first.
    pub fn schedule(&mut self, key: &TransactionKey, timer: TimerId, duration: Duration) {
        let Some(entry) = self.entries.get_mut(key) else {
            return;
        };
        if let Some(previous) = entry.timers.remove(&timer) {
            let _ = previous.send(());
        }
        let (cancel_tx, cancel_rx) = oneshot::channel();
        entry.timers.insert(timer, cancel_tx);
        let fire_tx = self.timer_tx.clone();
        let key = key.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(duration) => {
                    let _ = fire_tx.send((key, timer)).await;
                }
                _ = cancel_rx => {}
            }
        });
    }

    pub fn cancel_timer(&mut self, key: &TransactionKey, timer: TimerId) {
        if let Some(entry) = self.entries.get_mut(key) {
            if let Some(cancel) = entry.timers.remove(&timer) {
                let _ = cancel.send(());
            }
        }
    }

    /// Removes a transaction, cancelling its timers.
    pub fn remove(&mut self, key: &TransactionKey) -> Option<TransactionEntry> {
        let entry = self.take(key)?;
        self.metrics.record_completed();
        debug!(?key, "transaction purged");
        Some(entry)
    }

    /// Detaches an entry without touching the counters.
    fn take(&mut self, key: &TransactionKey) -> Option<TransactionEntry> {
        let mut entry = self.entries.remove(key)?;
        entry.cancel_all_timers();
        Some(entry)
    }

    /// Drops every entry whose machine has reached Terminated.
    pub fn purge_terminated(&mut self) -> Vec<TransactionKey> {
        let dead: Vec<TransactionKey> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.fsm.is_terminated())
            .map(|(key, _)| key.clone())
            .collect();
        for key in &dead {
            self.remove(key);
        }
        dead
    }

    /// Iterates over live keys.
    pub fn keys(&self) -> impl Iterator<Item = &TransactionKey> {
        self.entries.keys()
    }

    /// Drops every transaction, cancelling all timers. Used when a cell
    /// shuts down.
    pub fn clear(&mut self) {
        for (_, entry) in self.entries.iter_mut() {
            entry.cancel_all_timers();
        }
        self.entries.clear();
    }

    fn evict_if_full(&mut self, server_side: bool) {
        let count = self
            .entries
            .keys()
            .filter(|k| k.role.is_server() == server_side)
            .count();
        let limit = if server_side {
            self.limits.max_server
        } else {
            self.limits.max_client
        };
        if count < limit {
            return;
        }
        let oldest = self
            .entries
            .iter()
            .filter(|(k, _)| k.role.is_server() == server_side)
            .min_by_key(|(_, entry)| entry.created_at)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            warn!(?key, limit, "transaction cap reached, evicting oldest");
            self.take(&key);
            self.metrics.record_evicted();
        }
    }
}
