use std::fmt;

use smol_str::SmolStr;

use crate::params::{self, Params};

/// The Event header (RFC 6665): package name plus optional `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventHeader {
    pub package: SmolStr,
    pub params: Params,
}

impl EventHeader {
    /// Parses an Event header value like `refer;id=93809824`.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        if input.is_empty() {
            return None;
        }
        let (package, params) = match input.split_once(';') {
            Some((package, tail)) => (package.trim(), params::parse_params(tail)),
            None => (input, Params::new()),
        };
        if package.is_empty() {
            return None;
        }
        Some(Self {
            package: SmolStr::new(package),
            params,
        })
    }

    /// The `id` parameter distinguishing parallel subscriptions.
    pub fn id(&self) -> Option<&SmolStr> {
        params::param_value(&self.params, "id")
    }

    /// Key identifying the subscription usage within a dialog.
    pub fn usage_key(&self) -> SmolStr {
        match self.id() {
            Some(id) => SmolStr::new(format!("{};id={}", self.package, id)),
            None => self.package.clone(),
        }
    }
}

impl fmt::Display for EventHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        out.push_str(&self.package);
        params::write_params(&mut out, &self.params);
        f.write_str(&out)
    }
}

/// Subscription-State header values (RFC 6665 §4.1.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionState {
    Active,
    Pending,
    Terminated,
    Unknown(SmolStr),
}

impl SubscriptionState {
    pub fn parse(token: &str) -> Self {
        if token.eq_ignore_ascii_case("active") {
            SubscriptionState::Active
        } else if token.eq_ignore_ascii_case("pending") {
            SubscriptionState::Pending
        } else if token.eq_ignore_ascii_case("terminated") {
            SubscriptionState::Terminated
        } else {
            SubscriptionState::Unknown(SmolStr::new(token))
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            SubscriptionState::Active => "active",
            SubscriptionState::Pending => "pending",
            SubscriptionState::Terminated => "terminated",
            SubscriptionState::Unknown(value) => value.as_str(),
        }
    }
}
