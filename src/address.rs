use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;

/// A listener or backend address as it appears in configuration.
///
/// Route targets may be socket addresses, unix paths, or bare hostnames.
/// Only socket addresses can be connected (backend DNS resolution is
/// deliberately unsupported); the other variants exist so they can be
/// recognized and refused with a useful message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Address {
    Inet(SocketAddr),
    Unix(PathBuf),
    Name(String, u16),
}

impl Address {
    /// Parses a config address: `unix:<path>`, a socket-address literal,
    /// an IP literal, or a hostname with an optional `:port` suffix.
    /// `default_port` applies when the string itself names no port; a
    /// port of `0` means "defer to the listener port" at route time.
    pub fn parse(s: &str, default_port: u16) -> Address {
        if s.starts_with("unix:") {
            return Address::Unix(PathBuf::from(&s[5..]));
        }
        if let Ok(sa) = SocketAddr::from_str(s) {
            return Address::Inet(sa);
        }
        if let Ok(ip) = IpAddr::from_str(s) {
            return Address::Inet(SocketAddr::new(ip, default_port));
        }
        match split_host_port(s) {
            Some((host, port)) => Address::Name(host.to_lowercase(), port),
            None => Address::Name(s.to_lowercase(), default_port),
        }
    }

    pub fn is_sockaddr(&self) -> bool {
        match *self {
            Address::Inet(_) => true,
            _ => false,
        }
    }

    pub fn is_hostname(&self) -> bool {
        match *self {
            Address::Name(..) => true,
            _ => false,
        }
    }

    pub fn sockaddr(&self) -> Option<SocketAddr> {
        match *self {
            Address::Inet(sa) => Some(sa),
            _ => None,
        }
    }

    pub fn port(&self) -> Option<u16> {
        match *self {
            Address::Inet(sa) => Some(sa.port()),
            Address::Name(_, port) => Some(port),
            Address::Unix(_) => None,
        }
    }

    /// Replaces an unset (zero) port with `port`.
    pub fn with_default_port(self, port: u16) -> Address {
        match self {
            Address::Inet(mut sa) => {
                if sa.port() == 0 {
                    sa.set_port(port);
                }
                Address::Inet(sa)
            }
            Address::Name(host, 0) => Address::Name(host, port),
            other => other,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Address::Inet(ref sa) => write!(f, "{}", sa),
            Address::Unix(ref path) => write!(f, "unix:{}", path.display()),
            Address::Name(ref host, port) => write!(f, "{}:{}", host, port),
        }
    }
}

/// Splits a trailing `:port` off a hostname. IPv6 literals never reach
/// here; `Address::parse` has already tried them.
fn split_host_port(s: &str) -> Option<(&str, u16)> {
    let idx = s.rfind(':')?;
    let (host, port) = (&s[..idx], &s[idx + 1..]);
    if host.is_empty() || port.is_empty() {
        return None;
    }
    match u16::from_str(port) {
        Ok(port) => Some((host, port)),
        Err(_) => None,
    }
}
