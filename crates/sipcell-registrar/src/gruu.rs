// sipcell - The Sipcell SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! GRUU minting (RFC 5627).
//!
//! The public GRUU is stable per `(AOR, instance)`: the `gr` parameter is a
//! digest over both, so the same device re-registering always receives the
//! same URI. Temporary GRUUs are opaque random user parts that stay valid
//! only while the instance keeps registering under the same Call-ID.

use rand::{distributions::Alphanumeric, Rng};
use sha2::{Digest, Sha256};
use smol_str::SmolStr;

use sipcell_core::SipUri;

/// Digest token for the `gr` parameter of a public GRUU.
pub fn gr_token(aor: &str, instance_key: &str) -> SmolStr {
    let mut hasher = Sha256::new();
    hasher.update(aor.as_bytes());
    hasher.update(instance_key.as_bytes());
    let digest = hasher.finalize();
    let mut token = String::with_capacity(16);
    for byte in &digest[..8] {
        token.push_str(&format!("{byte:02x}"));
    }
    SmolStr::new(token)
}

/// Hash of the `+sip.instance` value; empty input yields the empty key.
pub fn instance_key(instance: &str) -> SmolStr {
    if instance.is_empty() {
        return SmolStr::default();
    }
    let mut hasher = Sha256::new();
    hasher.update(instance.as_bytes());
    let digest = hasher.finalize();
    let mut key = String::with_capacity(16);
    for byte in &digest[..8] {
        key.push_str(&format!("{byte:02x}"));
    }
    SmolStr::new(key)
}

/// Builds the stable public GRUU `sip:<user>@<domain>;gr=<token>`.
pub fn mint_pub_gruu(user: Option<&str>, domain: &str, token: &str) -> SipUri {
    let mut uri = SipUri::new(domain);
    if let Some(user) = user {
        uri = uri.with_user(user);
    }
    uri.with_param("gr", Some(token))
}

/// Builds a fresh temporary GRUU `sip:<opaque>@<domain>;gr` and returns it
/// with its opaque token.
pub fn mint_temp_gruu(domain: &str) -> (SipUri, SmolStr) {
    let mut rng = rand::thread_rng();
    let opaque: String = (&mut rng)
        .sample_iter(&Alphanumeric)
        .take(24)
        .map(char::from)
        .collect();
    let opaque = SmolStr::new(opaque);
    let uri = SipUri::new(domain)
        .with_user(opaque.clone())
        .with_param("gr", None);
    (uri, opaque)
}

/// True when a URI claims to be a GRUU (carries the `gr` parameter).
pub fn is_gruu(uri: &SipUri) -> bool {
    uri.param("gr").is_some()
}

/// The `gr` parameter value of a public GRUU, if any.
pub fn gr_value(uri: &SipUri) -> Option<&SmolStr> {
    uri.param("gr").and_then(|value| value.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pub_gruu_is_stable() {
        let token_a = gr_token("sip:alice@example.com", "ik1");
        let token_b = gr_token("sip:alice@example.com", "ik1");
        assert_eq!(token_a, token_b);
        assert_ne!(token_a, gr_token("sip:alice@example.com", "ik2"));
        assert_ne!(token_a, gr_token("sip:bob@example.com", "ik1"));
    }

    #[test]
    fn pub_gruu_shape() {
        let uri = mint_pub_gruu(Some("alice"), "example.com", "deadbeef01020304");
        assert_eq!(uri.user.as_deref(), Some("alice"));
        assert_eq!(uri.host.as_str(), "example.com");
        assert!(is_gruu(&uri));
        assert_eq!(gr_value(&uri).unwrap().as_str(), "deadbeef01020304");
    }

    #[test]
    fn temp_gruus_are_unique_and_valueless() {
        let (uri_a, opaque_a) = mint_temp_gruu("example.com");
        let (uri_b, opaque_b) = mint_temp_gruu("example.com");
        assert_ne!(opaque_a, opaque_b);
        assert!(is_gruu(&uri_a));
        assert!(gr_value(&uri_b).is_none());
        assert_eq!(uri_a.user.as_deref(), Some(opaque_a.as_str()));
    }

    #[test]
    fn instance_keys_differ() {
        assert_ne!(
            instance_key("<urn:uuid:aaa>"),
            instance_key("<urn:uuid:bbb>")
        );
        assert!(instance_key("").is_empty());
    }
}
