//! Protocol dissectors: pure byte-in / hostname-out inspection of the
//! first bytes a client sends.

mod http;
mod tls;

/// Outcome of dissecting the peeked prefix of a client stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Parsed {
    /// A hostname was extracted: lowercased, any `:port` suffix removed.
    Hostname(String),
    /// Valid so far, but too short to decide. Retry with more bytes.
    Incomplete,
    /// A complete request that names no host. The listener fallback
    /// applies, if there is one.
    NoHostname,
    /// The bytes cannot be a request of this protocol.
    Malformed,
}

/// The wire protocol a listener expects; selects the dissector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tls,
    Http,
}

impl Protocol {
    pub fn parse_packet(&self, data: &[u8]) -> Parsed {
        match *self {
            Protocol::Tls => tls::parse_packet(data),
            Protocol::Http => http::parse_packet(data),
        }
    }

    pub fn name(&self) -> &'static str {
        match *self {
            Protocol::Tls => "tls",
            Protocol::Http => "http",
        }
    }
}

impl Default for Protocol {
    fn default() -> Protocol {
        Protocol::Tls
    }
}
