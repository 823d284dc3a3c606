/// SIP protocol version marker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SipVersion {
    #[default]
    V2,
}

impl SipVersion {
    /// Returns the on-the-wire representation.
    pub fn as_str(&self) -> &'static str {
        "SIP/2.0"
    }
}
