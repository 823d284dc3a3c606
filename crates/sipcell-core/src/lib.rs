// sipcell - The Sipcell SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Core SIP types, messages, headers, and URIs.
//!
//! This crate provides the foundational types for the Sipcell SIP stack:
//! - **Messages**: [`SipMsg`] with typed core headers and a residual header bag
//! - **URIs**: [`SipUri`] (sip/sips), [`TelUri`] (RFC 3966), [`Uri`] (unified)
//! - **Headers**: [`Headers`] container, [`ViaHeader`], [`NameAddr`], [`ContactValue`]
//! - **Methods**: [`Method`] enum (INVITE, REGISTER, SUBSCRIBE, etc.)
//!
//! All types are designed for cheap cloning and zero-copy handling where
//! possible, using [`SmolStr`](smol_str::SmolStr) for header-sized strings and
//! [`Bytes`](bytes::Bytes) for binary payloads.
//!
//! # Examples
//!
//! ```
//! # use sipcell_core::*;
//! let uri = SipUri::parse("sip:alice@example.com;transport=tcp").unwrap();
//! assert_eq!(uri.host.as_str(), "example.com");
//! assert_eq!(uri.transport(), Some(TransportKind::Tcp));
//! ```

pub mod contact;
pub mod date;
pub mod event;
pub mod headers;
pub mod method;
pub mod msg;
pub mod name_addr;
pub mod params;
pub mod tel_uri;
pub mod token_list;
pub mod transport;
pub mod uri;
pub mod version;
pub mod via;

pub use contact::ContactValue;
pub use date::DateHeader;
pub use event::{EventHeader, SubscriptionState};
pub use headers::{Header, Headers};
pub use method::{method_allow_list, Method};
pub use msg::{generate_tag, CSeq, MsgKind, SipMsg, DEFAULT_MAX_FORWARDS};
pub use name_addr::NameAddr;
pub use params::Params;
pub use tel_uri::TelUri;
pub use token_list::TokenList;
pub use transport::TransportKind;
pub use uri::{SipUri, Uri};
pub use version::SipVersion;
pub use via::ViaHeader;

/// RFC 3261 magic cookie that prefixes every modern branch parameter.
pub const MAGIC_COOKIE: &str = "z9hG4bK";

/// Returns true when the branch carries the RFC 3261 magic cookie.
pub fn has_magic_cookie(branch: &str) -> bool {
    branch.starts_with(MAGIC_COOKIE)
}
