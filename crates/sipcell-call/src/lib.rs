// sipcell - The Sipcell SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The call layer: per-Call-ID cells, the application router, the stack
//! dispatcher, and the ports everything plugs into.
//!
//! Wiring a stack together:
//!
//! ```no_run
//! use std::sync::Arc;
//! use sipcell_call::{DefaultApplication, SipStack, StackConfig};
//! # use async_trait::async_trait;
//! # use bytes::Bytes;
//! # use sipcell_call::{SendErrorKind, Transport, TransportDest};
//! # struct NullTransport;
//! # #[async_trait]
//! # impl Transport for NullTransport {
//! #     async fn send(&self, _d: &TransportDest, _p: Bytes) -> Result<(), SendErrorKind> { Ok(()) }
//! # }
//!
//! # fn main() -> anyhow::Result<()> {
//! let stack = SipStack::with_memory_store(
//!     StackConfig::default(),
//!     Arc::new(NullTransport),
//!     Arc::new(DefaultApplication),
//! )?;
//! # Ok(())
//! # }
//! ```

pub mod cell;
pub mod config;
pub mod plugin;
pub mod ports;
pub mod router;
pub mod stack;

pub use cell::CellMsg;
pub use config::{ConfigError, ListenConfig, StackConfig};
pub use plugin::{HookResult, Plugin, PluginChain};
pub use ports::{Clock, MonotonicClock, SendErrorKind, Transport, TransportDest};
pub use router::{default_uas_reply, Application, DefaultApplication, RouteVerdict, SipReply};
pub use stack::{RecvOutcome, SipStack};
