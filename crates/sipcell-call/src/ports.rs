// sipcell - The Sipcell SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Ports the core consumes. Socket plumbing, DNS, and wall clocks live on
//! the other side of these traits.

use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use smol_str::SmolStr;

use sipcell_core::{SipUri, TransportKind};

/// Where bytes go or came from. Name resolution is the transport's problem;
/// the core only ever names `(transport, host, port)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransportDest {
    pub transport: TransportKind,
    pub host: SmolStr,
    pub port: u16,
}

impl TransportDest {
    pub fn new(transport: TransportKind, host: impl Into<SmolStr>, port: u16) -> Self {
        Self {
            transport,
            host: host.into(),
            port,
        }
    }

    /// Destination a request to this URI travels to (RFC 3263 minus DNS:
    /// explicit transport or SIPS implies TLS, port falls back per
    /// transport).
    pub fn from_uri(uri: &SipUri) -> Self {
        let transport = uri.effective_transport();
        Self {
            transport,
            host: uri.host.clone(),
            port: uri.effective_port(),
        }
    }
}

impl std::fmt::Display for TransportDest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.transport, self.host, self.port)
    }
}

/// Why a send failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendErrorKind {
    Unreachable,
    ConnectionClosed,
    Oversized,
}

impl std::fmt::Display for SendErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SendErrorKind::Unreachable => write!(f, "destination unreachable"),
            SendErrorKind::ConnectionClosed => write!(f, "connection closed"),
            SendErrorKind::Oversized => write!(f, "payload too large"),
        }
    }
}

impl std::error::Error for SendErrorKind {}

/// Outbound byte transport. Implementations own sockets, connection reuse,
/// and keep-alives.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(&self, dest: &TransportDest, payload: Bytes) -> Result<(), SendErrorKind>;
}

/// Monotonic time source, swappable for tests.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

/// The default clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
