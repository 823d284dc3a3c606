use std::time::SystemTime;

use smol_str::SmolStr;

/// SIP Date header: RFC 1123 text plus the parsed instant when valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateHeader {
    pub raw: SmolStr,
    pub timestamp: Option<SystemTime>,
}

impl DateHeader {
    pub fn new(raw: impl Into<SmolStr>, timestamp: Option<SystemTime>) -> Self {
        Self {
            raw: raw.into(),
            timestamp,
        }
    }
}
