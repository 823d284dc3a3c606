// sipcell - The Sipcell SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Transaction lifecycle counters.
//!
//! The counters sit behind a `parking_lot::RwLock` and are touched only by
//! the owning cell's synchronous bookkeeping, never across an await point.
//! Readers take a copy with [`TransactionMetrics::snapshot`].

use parking_lot::RwLock;

/// Point-in-time view of a transaction set's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Client transactions ever created.
    pub client_created: u64,
    /// Server transactions ever created.
    pub server_created: u64,
    /// Transactions that ran to completion (terminal state reached).
    pub completed: u64,
    /// Transactions dropped early by the per-call cap.
    pub evicted: u64,
}

impl MetricsSnapshot {
    /// Transactions created but not yet completed or evicted.
    pub fn live(&self) -> u64 {
        (self.client_created + self.server_created).saturating_sub(self.completed + self.evicted)
    }
}

/// Counter store owned by a [`TransactionSet`](crate::TransactionSet).
#[derive(Debug, Default)]
pub struct TransactionMetrics {
    counters: RwLock<MetricsSnapshot>,
}

impl TransactionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_created(&self, server_side: bool) {
        let mut counters = self.counters.write();
        if server_side {
            counters.server_created += 1;
        } else {
            counters.client_created += 1;
        }
    }

    pub(crate) fn record_completed(&self) {
        self.counters.write().completed += 1;
    }

    pub(crate) fn record_evicted(&self) {
        self.counters.write().evicted += 1;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        *self.counters.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_per_side() {
        let metrics = TransactionMetrics::new();
        metrics.record_created(true);
        metrics.record_created(true);
        metrics.record_created(false);
        metrics.record_completed();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.server_created, 2);
        assert_eq!(snapshot.client_created, 1);
        assert_eq!(snapshot.completed, 1);
        assert_eq!(snapshot.live(), 2);
    }

    #[test]
    fn eviction_counts_separately_from_completion() {
        let metrics = TransactionMetrics::new();
        metrics.record_created(true);
        metrics.record_evicted();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.completed, 0);
        assert_eq!(snapshot.evicted, 1);
        assert_eq!(snapshot.live(), 0);
    }
}
