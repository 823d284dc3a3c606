use std::fmt;

use smol_str::SmolStr;

use crate::params::{self, Params};

/// Telephone URI per RFC 3966.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TelUri {
    /// Subscriber number with visual separators removed.
    pub number: SmolStr,
    /// True for global numbers (leading `+`).
    pub is_global: bool,
    pub params: Params,
}

impl TelUri {
    /// Parses a `tel:` URI.
    pub fn parse(input: &str) -> Option<Self> {
        let rest = input.trim().strip_prefix("tel:")?;
        let (number_part, params) = match rest.split_once(';') {
            Some((number, tail)) => (number, params::parse_params(tail)),
            None => (rest, Params::new()),
        };
        let is_global = number_part.starts_with('+');
        let digits = number_part.trim_start_matches('+');
        let number: String = digits
            .chars()
            .filter(|c| !matches!(c, '-' | '.' | ' ' | '(' | ')'))
            .collect();
        if number.is_empty() || !number.chars().all(|c| c.is_ascii_hexdigit() || c == '*' || c == '#') {
            return None;
        }
        let number = if is_global {
            SmolStr::new(format!("+{number}"))
        } else {
            SmolStr::new(number)
        };
        Some(Self {
            number,
            is_global,
            params,
        })
    }

    /// Returns the `phone-context` parameter for local numbers.
    pub fn phone_context(&self) -> Option<&SmolStr> {
        params::param_value(&self.params, "phone-context")
    }
}

impl fmt::Display for TelUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::from("tel:");
        out.push_str(&self.number);
        params::write_params(&mut out, &self.params);
        f.write_str(&out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_number() {
        let uri = TelUri::parse("tel:+1-555-123-4567").unwrap();
        assert!(uri.is_global);
        assert_eq!(uri.number.as_str(), "+15551234567");
        assert_eq!(uri.to_string(), "tel:+15551234567");
    }

    #[test]
    fn local_number_keeps_phone_context() {
        let uri = TelUri::parse("tel:5551234;phone-context=example.com").unwrap();
        assert!(!uri.is_global);
        assert_eq!(uri.phone_context().unwrap().as_str(), "example.com");
    }

    #[test]
    fn rejects_empty_number() {
        assert!(TelUri::parse("tel:").is_none());
        assert!(TelUri::parse("tel:;ext=1").is_none());
    }
}
