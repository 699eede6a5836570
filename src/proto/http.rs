//! HTTP/1.x request dissection: finds the `Host` header.

use super::Parsed;
use std::str;

pub fn parse_packet(data: &[u8]) -> Parsed {
    let mut lines = Lines { data: data, pos: 0 };

    // Request line: METHOD SP request-target SP HTTP-version CRLF.
    match lines.next_line() {
        Line::Partial(line) => {
            return if printable(line) {
                Parsed::Incomplete
            } else {
                Parsed::Malformed
            };
        }
        Line::Complete(line) => {
            if !valid_request_line(line) {
                return Parsed::Malformed;
            }
        }
    }

    loop {
        match lines.next_line() {
            Line::Partial(line) => {
                return if printable(line) {
                    Parsed::Incomplete
                } else {
                    Parsed::Malformed
                };
            }
            Line::Complete(line) if line.is_empty() => return Parsed::NoHostname,
            Line::Complete(line) => {
                if line[0] == b' ' || line[0] == b'\t' {
                    // Folded continuation of a header we are skipping.
                    continue;
                }
                let (name, value) = match split_header(line) {
                    Some(h) => h,
                    None => return Parsed::Malformed,
                };
                if name.eq_ignore_ascii_case(b"host") {
                    return host_value(value);
                }
            }
        }
    }
}

enum Line<'a> {
    Complete(&'a [u8]),
    Partial(&'a [u8]),
}

struct Lines<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Lines<'a> {
    fn next_line(&mut self) -> Line<'a> {
        let rest = &self.data[self.pos..];
        match rest.iter().position(|&b| b == b'\n') {
            Some(i) => {
                self.pos += i + 1;
                let mut line = &rest[..i];
                if line.last() == Some(&b'\r') {
                    line = &line[..line.len() - 1];
                }
                Line::Complete(line)
            }
            None => Line::Partial(rest),
        }
    }
}

fn printable(bytes: &[u8]) -> bool {
    bytes
        .iter()
        .all(|&b| (b >= 0x20 && b < 0x7f) || b == b'\r' || b == b'\t')
}

fn valid_request_line(line: &[u8]) -> bool {
    let mut parts = line.split(|&b| b == b' ');
    let method = match parts.next() {
        Some(m) if !m.is_empty() => m,
        _ => return false,
    };
    if !method.iter().all(|&b| b >= b'A' && b <= b'Z') {
        return false;
    }
    match parts.next() {
        Some(t) if !t.is_empty() => {}
        _ => return false,
    }
    match parts.next() {
        Some(version) => version.starts_with(b"HTTP/") && parts.next().is_none(),
        None => false,
    }
}

fn split_header(line: &[u8]) -> Option<(&[u8], &[u8])> {
    let idx = match line.iter().position(|&b| b == b':') {
        Some(i) => i,
        None => return None,
    };
    let name = &line[..idx];
    if name.is_empty() || name.iter().any(|&b| b == b' ' || b == b'\t') {
        return None;
    }
    Some((name, &line[idx + 1..]))
}

fn host_value(value: &[u8]) -> Parsed {
    let value = match str::from_utf8(value) {
        Ok(v) => v.trim(),
        Err(_) => return Parsed::Malformed,
    };
    if value.is_empty() {
        return Parsed::NoHostname;
    }
    let host = if value.starts_with('[') {
        // Bracketed IPv6 literal, possibly with a port after the bracket.
        match value.find(']') {
            Some(i) => &value[1..i],
            None => return Parsed::Malformed,
        }
    } else {
        strip_port(value)
    };
    if host.is_empty() {
        return Parsed::NoHostname;
    }
    Parsed::Hostname(host.to_lowercase())
}

fn strip_port(value: &str) -> &str {
    match value.rfind(':') {
        Some(idx) => {
            let port = &value[idx + 1..];
            if !port.is_empty() && port.bytes().all(|b| b >= b'0' && b <= b'9') {
                &value[..idx]
            } else {
                value
            }
        }
        None => value,
    }
}
