// sipcell - The Sipcell SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Transport-aware timer durations per RFC 3261 §17 Table 4.
//!
//! On reliable transports the retransmission timers (A/E/G) and the linger
//! timers (D/K/I/J) collapse to zero; the timeout timers (B/F/H) stay at
//! 64*T1 everywhere.

use std::time::Duration;

use sipcell_core::TransportKind;

/// The timers referenced by the transaction state machines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerId {
    A,
    B,
    C,
    D,
    E,
    F,
    G,
    H,
    I,
    J,
    K,
}

/// Base timer constants (RFC 3261 Table 4) plus the proxy INVITE timeout.
///
/// These are captured when a transaction is created; later configuration
/// changes do not retime in-flight transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerDefaults {
    /// RTT estimate, default 500 ms. Never configure below that.
    pub t1: Duration,
    /// Maximum retransmit interval for non-INVITE, default 4 s.
    pub t2: Duration,
    /// Maximum time a message stays in the network, default 5 s.
    pub t4: Duration,
    /// Explicit client transaction timeout (timers B and F); 64*T1 when
    /// unset.
    pub tb: Option<Duration>,
    /// Timer C, proxy INVITE timeout, default 180 s.
    pub tc: Duration,
}

impl Default for TimerDefaults {
    fn default() -> Self {
        Self {
            t1: Duration::from_millis(500),
            t2: Duration::from_secs(4),
            t4: Duration::from_secs(5),
            tb: None,
            tc: Duration::from_secs(180),
        }
    }
}

/// Timer duration calculator for a transaction's transport.
#[derive(Debug, Clone, Copy)]
pub struct TransportTimers {
    transport: TransportKind,
    defaults: TimerDefaults,
}

impl TransportTimers {
    pub fn new(transport: TransportKind, defaults: TimerDefaults) -> Self {
        Self {
            transport,
            defaults,
        }
    }

    pub fn defaults(&self) -> TimerDefaults {
        self.defaults
    }

    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    /// Retransmissions only happen on unreliable transports.
    pub fn should_retransmit(&self) -> bool {
        !self.transport.is_reliable()
    }

    /// Initial duration for a timer; retransmission timers double at the
    /// call site, capped at T2.
    pub fn duration(&self, timer: TimerId) -> Duration {
        let reliable = self.transport.is_reliable();
        match timer {
            TimerId::A | TimerId::E | TimerId::G => {
                if reliable {
                    Duration::ZERO
                } else {
                    self.defaults.t1
                }
            }
            TimerId::B | TimerId::F => self
                .defaults
                .tb
                .unwrap_or_else(|| self.defaults.t1.saturating_mul(64)),
            TimerId::H => self.defaults.t1.saturating_mul(64),
            TimerId::C => self.defaults.tc,
            TimerId::D => {
                if reliable {
                    Duration::ZERO
                } else {
                    // Fixed lower bound of 32 s per RFC 3261 §17.1.1.2,
                    // scaled up if T1 was raised.
                    Duration::from_secs(32).max(self.defaults.t1.saturating_mul(64))
                }
            }
            TimerId::K | TimerId::I => {
                if reliable {
                    Duration::ZERO
                } else {
                    self.defaults.t4
                }
            }
            TimerId::J => {
                if reliable {
                    Duration::ZERO
                } else {
                    self.defaults.t1.saturating_mul(64)
                }
            }
        }
    }

    /// T2 cap used by the doubling retransmission timers.
    pub fn t2(&self) -> Duration {
        self.defaults.t2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn udp() -> TransportTimers {
        TransportTimers::new(TransportKind::Udp, TimerDefaults::default())
    }

    fn tcp() -> TransportTimers {
        TransportTimers::new(TransportKind::Tcp, TimerDefaults::default())
    }

    #[test]
    fn retransmit_timers_zero_on_reliable() {
        for timer in [TimerId::A, TimerId::E, TimerId::G] {
            assert_eq!(tcp().duration(timer), Duration::ZERO);
            assert_eq!(udp().duration(timer), Duration::from_millis(500));
        }
    }

    #[test]
    fn timeout_timers_are_64_t1_everywhere() {
        for timer in [TimerId::B, TimerId::F, TimerId::H] {
            assert_eq!(udp().duration(timer), Duration::from_secs(32));
            assert_eq!(tcp().duration(timer), Duration::from_secs(32));
        }
    }

    #[test]
    fn linger_timers_collapse_on_reliable() {
        assert_eq!(udp().duration(TimerId::D), Duration::from_secs(32));
        assert_eq!(udp().duration(TimerId::K), Duration::from_secs(5));
        assert_eq!(udp().duration(TimerId::I), Duration::from_secs(5));
        assert_eq!(udp().duration(TimerId::J), Duration::from_secs(32));
        for timer in [TimerId::D, TimerId::K, TimerId::I, TimerId::J] {
            assert_eq!(tcp().duration(timer), Duration::ZERO);
        }
    }

    #[test]
    fn timer_c_defaults_to_three_minutes() {
        assert_eq!(udp().duration(TimerId::C), Duration::from_secs(180));
    }

    #[test]
    fn explicit_tb_overrides_client_timeouts_only() {
        let defaults = TimerDefaults {
            tb: Some(Duration::from_secs(10)),
            ..TimerDefaults::default()
        };
        let timers = TransportTimers::new(TransportKind::Udp, defaults);
        assert_eq!(timers.duration(TimerId::B), Duration::from_secs(10));
        assert_eq!(timers.duration(TimerId::F), Duration::from_secs(10));
        // the server-side ACK timeout keeps its RFC value
        assert_eq!(timers.duration(TimerId::H), Duration::from_secs(32));
    }

    #[test]
    fn custom_t1_scales_timeouts() {
        let defaults = TimerDefaults {
            t1: Duration::from_secs(1),
            ..TimerDefaults::default()
        };
        let timers = TransportTimers::new(TransportKind::Udp, defaults);
        assert_eq!(timers.duration(TimerId::F), Duration::from_secs(64));
        assert_eq!(timers.duration(TimerId::D), Duration::from_secs(64));
    }
}
