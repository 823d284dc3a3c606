use smol_str::SmolStr;

/// SIP request methods recognized by the stack.
///
/// Method tokens are case-sensitive per RFC 3261 §7.1: `invite` is not
/// INVITE and is carried verbatim as [`Method::Unknown`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Invite,
    Register,
    Bye,
    Ack,
    Cancel,
    Options,
    Subscribe,
    Notify,
    Publish,
    Refer,
    Message,
    Info,
    Prack,
    Update,
    Unknown(SmolStr),
}

impl Method {
    /// Returns the canonical string representation for this method.
    pub fn as_str(&self) -> &str {
        match self {
            Method::Invite => "INVITE",
            Method::Register => "REGISTER",
            Method::Bye => "BYE",
            Method::Ack => "ACK",
            Method::Cancel => "CANCEL",
            Method::Options => "OPTIONS",
            Method::Subscribe => "SUBSCRIBE",
            Method::Notify => "NOTIFY",
            Method::Publish => "PUBLISH",
            Method::Refer => "REFER",
            Method::Message => "MESSAGE",
            Method::Info => "INFO",
            Method::Prack => "PRACK",
            Method::Update => "UPDATE",
            Method::Unknown(token) => token.as_str(),
        }
    }

    /// Parses a method token, returning Unknown for extension methods.
    pub fn from_token(token: &str) -> Self {
        match token {
            "INVITE" => Method::Invite,
            "REGISTER" => Method::Register,
            "BYE" => Method::Bye,
            "ACK" => Method::Ack,
            "CANCEL" => Method::Cancel,
            "OPTIONS" => Method::Options,
            "SUBSCRIBE" => Method::Subscribe,
            "NOTIFY" => Method::Notify,
            "PUBLISH" => Method::Publish,
            "REFER" => Method::Refer,
            "MESSAGE" => Method::Message,
            "INFO" => Method::Info,
            "PRACK" => Method::Prack,
            "UPDATE" => Method::Update,
            other => Method::Unknown(SmolStr::new(other)),
        }
    }
}

/// Canonical Allow header value listing every method the stack knows.
pub fn method_allow_list() -> &'static str {
    "INVITE, ACK, BYE, CANCEL, OPTIONS, REGISTER, SUBSCRIBE, NOTIFY, PUBLISH, REFER, MESSAGE, INFO, PRACK, UPDATE"
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_methods_round_trip() {
        for token in [
            "INVITE", "REGISTER", "BYE", "ACK", "CANCEL", "OPTIONS", "SUBSCRIBE", "NOTIFY",
            "PUBLISH", "REFER", "MESSAGE", "INFO", "PRACK", "UPDATE",
        ] {
            let method = Method::from_token(token);
            assert!(!matches!(method, Method::Unknown(_)), "{token}");
            assert_eq!(method.as_str(), token);
        }
    }

    #[test]
    fn method_matching_is_case_sensitive() {
        assert_eq!(
            Method::from_token("invite"),
            Method::Unknown(SmolStr::new("invite"))
        );
        assert_eq!(Method::from_token("Invite").as_str(), "Invite");
    }
}
