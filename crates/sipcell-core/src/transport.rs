/// Transport the stack speaks SIP over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Udp,
    Tcp,
    Tls,
    Sctp,
    Ws,
    Wss,
}

impl TransportKind {
    /// Returns the canonical Via transport token.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Udp => "UDP",
            TransportKind::Tcp => "TCP",
            TransportKind::Tls => "TLS",
            TransportKind::Sctp => "SCTP",
            TransportKind::Ws => "WS",
            TransportKind::Wss => "WSS",
        }
    }

    /// Parses a transport token case-insensitively.
    pub fn from_token(token: &str) -> Option<Self> {
        if token.eq_ignore_ascii_case("UDP") {
            Some(TransportKind::Udp)
        } else if token.eq_ignore_ascii_case("TCP") {
            Some(TransportKind::Tcp)
        } else if token.eq_ignore_ascii_case("TLS") {
            Some(TransportKind::Tls)
        } else if token.eq_ignore_ascii_case("SCTP") {
            Some(TransportKind::Sctp)
        } else if token.eq_ignore_ascii_case("WS") {
            Some(TransportKind::Ws)
        } else if token.eq_ignore_ascii_case("WSS") {
            Some(TransportKind::Wss)
        } else {
            None
        }
    }

    /// Returns true for message-boundary-preserving datagram transports.
    pub fn is_datagram(self) -> bool {
        matches!(self, TransportKind::Udp)
    }

    /// Returns true for stream transports requiring Content-Length framing.
    pub fn is_stream(self) -> bool {
        !self.is_datagram()
    }

    /// Returns true for reliable transports (everything but UDP).
    ///
    /// Retransmission timers collapse to zero on reliable transports per
    /// RFC 3261 §17.1.2.2.
    pub fn is_reliable(self) -> bool {
        !matches!(self, TransportKind::Udp)
    }

    /// Default port when the URI carries none.
    pub fn default_port(self) -> u16 {
        match self {
            TransportKind::Udp | TransportKind::Tcp | TransportKind::Sctp => 5060,
            TransportKind::Tls | TransportKind::Wss => 5061,
            TransportKind::Ws => 80,
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
