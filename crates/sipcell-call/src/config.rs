// sipcell - The Sipcell SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Stack configuration.
//!
//! The option set is closed: unknown keys fail deserialization at startup
//! instead of being discovered (or silently ignored) at runtime.

use std::time::Duration;

use serde::Deserialize;
use smol_str::SmolStr;

use sipcell_core::{NameAddr, TransportKind};
use sipcell_transaction::TimerDefaults;

/// One listening endpoint.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ListenConfig {
    pub transport: String,
    pub host: String,
    pub port: u16,
}

impl ListenConfig {
    pub fn kind(&self) -> Option<TransportKind> {
        TransportKind::from_token(&self.transport)
    }
}

/// All tunables of one stack instance.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct StackConfig {
    /// Address/transport tuples to bind (consumed by the transport layer).
    pub sip_listen: Vec<ListenConfig>,
    /// Default From for locally originated requests.
    pub sip_from: Option<String>,
    /// Host this stack names itself with in Via/Contact/Record-Route.
    pub sip_local_host: String,
    /// Port advertised alongside `sip_local_host`.
    pub sip_local_port: u16,
    /// Emit deep-debug traces.
    pub sip_debug: bool,
    /// Ordered plugin names, resolved by the embedder at startup.
    pub plugins: Vec<String>,
    /// Timer T1 in milliseconds (RTT estimate).
    pub t1_ms: u64,
    /// Timer T2 in milliseconds (retransmit cap).
    pub t2_ms: u64,
    /// Timer T4 in milliseconds (network clearing time).
    pub t4_ms: u64,
    /// Explicit client transaction timeout (timers B/F) in milliseconds;
    /// 64*T1 when absent.
    pub tb_ms: Option<u64>,
    /// Proxy INVITE timeout (Timer C) in milliseconds.
    pub tc_ms: u64,
    /// How long an idle call cell lingers before exiting.
    pub call_linger_ms: u64,
    /// Answer INVITEs with 100 Trying automatically.
    pub auto_100_trying: bool,
    /// Default registration expiry in seconds.
    pub registrar_default_expires: u32,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            sip_listen: Vec::new(),
            sip_from: None,
            sip_local_host: "localhost".to_string(),
            sip_local_port: 5060,
            sip_debug: false,
            plugins: Vec::new(),
            t1_ms: 500,
            t2_ms: 4_000,
            t4_ms: 5_000,
            tb_ms: None,
            tc_ms: 180_000,
            call_linger_ms: 5_000,
            auto_100_trying: true,
            registrar_default_expires: 3_600,
        }
    }
}

/// Configuration rejected at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidListen(String),
    InvalidFrom(String),
    TimerTooSmall { name: &'static str, minimum_ms: u64 },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidListen(entry) => write!(f, "invalid sip_listen entry: {entry}"),
            ConfigError::InvalidFrom(uri) => write!(f, "invalid sip_from: {uri}"),
            ConfigError::TimerTooSmall { name, minimum_ms } => {
                write!(f, "{name} below minimum of {minimum_ms} ms")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl StackConfig {
    /// Validates the closed option set.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for listen in &self.sip_listen {
            if listen.kind().is_none() {
                return Err(ConfigError::InvalidListen(listen.transport.clone()));
            }
        }
        if let Some(from) = &self.sip_from {
            if NameAddr::parse(from).is_none() {
                return Err(ConfigError::InvalidFrom(from.clone()));
            }
        }
        if self.t1_ms < 200 {
            return Err(ConfigError::TimerTooSmall {
                name: "t1_ms",
                minimum_ms: 200,
            });
        }
        if self.t2_ms < self.t1_ms {
            return Err(ConfigError::TimerTooSmall {
                name: "t2_ms",
                minimum_ms: self.t1_ms,
            });
        }
        Ok(())
    }

    /// Timer constants captured by new transactions.
    pub fn timer_defaults(&self) -> TimerDefaults {
        TimerDefaults {
            t1: Duration::from_millis(self.t1_ms),
            t2: Duration::from_millis(self.t2_ms),
            t4: Duration::from_millis(self.t4_ms),
            tb: self.tb_ms.map(Duration::from_millis),
            tc: Duration::from_millis(self.tc_ms),
        }
    }

    pub fn call_linger(&self) -> Duration {
        Duration::from_millis(self.call_linger_ms)
    }

    pub fn local_host(&self) -> SmolStr {
        SmolStr::new(&self.sip_local_host)
    }

    /// The configured default From, parsed.
    pub fn from_addr(&self) -> Option<NameAddr> {
        self.sip_from.as_deref().and_then(NameAddr::parse)
    }
}
