//! TLS ClientHello dissection: walks the record to the server_name
//! extension without terminating the handshake.

use super::Parsed;
use std::str;

const CONTENT_HANDSHAKE: u8 = 0x16;
const HANDSHAKE_CLIENT_HELLO: u8 = 0x01;
const EXTENSION_SERVER_NAME: u16 = 0x0000;
const NAME_TYPE_HOST: u8 = 0x00;

macro_rules! field {
    ($e:expr) => {
        match $e {
            Some(v) => v,
            None => return Parsed::Malformed,
        }
    };
}

pub fn parse_packet(data: &[u8]) -> Parsed {
    // Record header: content type, legacy version major, length. Judge
    // what has arrived before asking for more.
    if !data.is_empty() && data[0] != CONTENT_HANDSHAKE {
        return Parsed::Malformed;
    }
    if data.len() >= 2 && data[1] != 0x03 {
        return Parsed::Malformed;
    }
    if data.len() < 5 {
        return Parsed::Incomplete;
    }
    let record_len = ((data[3] as usize) << 8) | data[4] as usize;
    if record_len < 4 {
        return Parsed::Malformed;
    }
    if data.len() < 5 + record_len {
        return Parsed::Incomplete;
    }
    // The record is complete: from here a short field is Malformed, not
    // Incomplete.
    parse_client_hello(&data[5..5 + record_len])
}

fn parse_client_hello(record: &[u8]) -> Parsed {
    let mut r = Reader::new(record);
    if field!(r.u8()) != HANDSHAKE_CLIENT_HELLO {
        return Parsed::Malformed;
    }
    let body_len = field!(r.u24());
    let mut r = Reader::new(field!(r.take(body_len)));

    field!(r.skip(2 + 32)); // client_version, random
    let n = field!(r.u8()) as usize; // session_id
    field!(r.skip(n));
    let n = field!(r.u16()) as usize; // cipher_suites
    field!(r.skip(n));
    let n = field!(r.u8()) as usize; // compression_methods
    field!(r.skip(n));

    if r.remaining() == 0 {
        // Legacy hello with no extensions block.
        return Parsed::NoHostname;
    }
    let ext_len = field!(r.u16()) as usize;
    let mut exts = Reader::new(field!(r.take(ext_len)));
    while exts.remaining() >= 4 {
        let ext_type = field!(exts.u16());
        let len = field!(exts.u16()) as usize;
        let body = field!(exts.take(len));
        if ext_type == EXTENSION_SERVER_NAME {
            return parse_server_name(body);
        }
    }
    if exts.remaining() != 0 {
        return Parsed::Malformed;
    }
    Parsed::NoHostname
}

fn parse_server_name(body: &[u8]) -> Parsed {
    let mut r = Reader::new(body);
    let list_len = field!(r.u16()) as usize;
    let mut names = Reader::new(field!(r.take(list_len)));
    while names.remaining() >= 3 {
        let name_type = field!(names.u8());
        let len = field!(names.u16()) as usize;
        let name = field!(names.take(len));
        if name_type == NAME_TYPE_HOST {
            return match str::from_utf8(name) {
                Ok(s) if !s.is_empty() => Parsed::Hostname(s.to_lowercase()),
                _ => Parsed::Malformed,
            };
        }
    }
    Parsed::NoHostname
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Reader<'a> {
        Reader { data: data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn u8(&mut self) -> Option<u8> {
        if self.remaining() < 1 {
            return None;
        }
        let v = self.data[self.pos];
        self.pos += 1;
        Some(v)
    }

    fn u16(&mut self) -> Option<u16> {
        if self.remaining() < 2 {
            return None;
        }
        let v = ((self.data[self.pos] as u16) << 8) | self.data[self.pos + 1] as u16;
        self.pos += 2;
        Some(v)
    }

    fn u24(&mut self) -> Option<usize> {
        if self.remaining() < 3 {
            return None;
        }
        let v = ((self.data[self.pos] as usize) << 16) | ((self.data[self.pos + 1] as usize) << 8)
            | self.data[self.pos + 2] as usize;
        self.pos += 3;
        Some(v)
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.remaining() < n {
            return None;
        }
        let s = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Some(s)
    }

    fn skip(&mut self, n: usize) -> Option<()> {
        if self.remaining() < n {
            return None;
        }
        self.pos += n;
        Some(())
    }
}

#[cfg(test)]
mod tests {
    use super::parse_packet;
    use proto::Parsed;

    fn be16(v: u16) -> [u8; 2] {
        [(v >> 8) as u8, v as u8]
    }

    /// A minimal but well-formed ClientHello, optionally carrying SNI.
    fn client_hello(sni: Option<&str>) -> Vec<u8> {
        let mut exts = Vec::new();

        // An unrelated extension first, so the walk has to skip.
        exts.extend_from_slice(&be16(0x000b)); // ec_point_formats
        exts.extend_from_slice(&be16(2));
        exts.extend_from_slice(&[0x01, 0x00]);

        if let Some(name) = sni {
            let n = name.as_bytes();
            exts.extend_from_slice(&be16(0x0000));
            exts.extend_from_slice(&be16((n.len() + 5) as u16));
            exts.extend_from_slice(&be16((n.len() + 3) as u16)); // server_name_list
            exts.push(0x00); // host_name
            exts.extend_from_slice(&be16(n.len() as u16));
            exts.extend_from_slice(n);
        }

        let mut body = Vec::new();
        body.extend_from_slice(&[0x03, 0x03]); // client_version
        body.extend_from_slice(&[0u8; 32]); // random
        body.push(0); // session_id
        body.extend_from_slice(&[0x00, 0x02, 0x13, 0x01]); // cipher_suites
        body.extend_from_slice(&[0x01, 0x00]); // compression_methods
        body.extend_from_slice(&be16(exts.len() as u16));
        body.extend_from_slice(&exts);

        let mut hs = vec![0x01, 0x00];
        hs.extend_from_slice(&be16(body.len() as u16)); // u24 length, high byte above
        hs.extend_from_slice(&body);

        let mut rec = vec![0x16, 0x03, 0x01];
        rec.extend_from_slice(&be16(hs.len() as u16));
        rec.extend_from_slice(&hs);
        rec
    }

    #[test]
    fn extracts_sni() {
        let hello = client_hello(Some("example.com"));
        assert_eq!(
            parse_packet(&hello),
            Parsed::Hostname("example.com".to_owned())
        );
    }

    #[test]
    fn lowercases_the_name() {
        let hello = client_hello(Some("Example.COM"));
        assert_eq!(
            parse_packet(&hello),
            Parsed::Hostname("example.com".to_owned())
        );
    }

    #[test]
    fn hello_without_sni_has_no_hostname() {
        let hello = client_hello(None);
        assert_eq!(parse_packet(&hello), Parsed::NoHostname);
    }

    #[test]
    fn truncation_is_incomplete_at_every_length() {
        let hello = client_hello(Some("example.com"));
        for n in 0..hello.len() {
            assert_eq!(
                parse_packet(&hello[..n]),
                Parsed::Incomplete,
                "prefix of {} bytes",
                n
            );
        }
    }

    #[test]
    fn identical_input_yields_identical_results() {
        let hello = client_hello(Some("example.com"));
        assert_eq!(parse_packet(&hello), parse_packet(&hello));
    }

    #[test]
    fn non_tls_bytes_are_malformed() {
        assert_eq!(parse_packet(b"GET / HTTP/1.1\r\n"), Parsed::Malformed);
        assert_eq!(parse_packet(&[0x80, 0x2e]), Parsed::Malformed); // SSLv2
    }

    #[test]
    fn wrong_handshake_type_is_malformed() {
        let mut hello = client_hello(Some("example.com"));
        hello[5] = 0x02; // ServerHello
        assert_eq!(parse_packet(&hello), Parsed::Malformed);
    }

    #[test]
    fn garbage_extension_lengths_are_malformed() {
        let mut hello = client_hello(Some("example.com"));
        let at = hello.len() - "example.com".len() - 1;
        hello[at] = 0xff; // SNI name length now overruns the record
        assert_eq!(parse_packet(&hello), Parsed::Malformed);
    }
}
