//! Shared scaffolding: a ClientHello builder and a single-shot mock
//! backend running on a plain thread.

use std::io::{Read, Write};
use std::net;
use std::thread;

fn be16(v: u16) -> [u8; 2] {
    [(v >> 8) as u8, v as u8]
}

/// A minimal but well-formed TLS ClientHello, optionally carrying SNI.
pub fn client_hello(sni: Option<&str>) -> Vec<u8> {
    let mut exts = Vec::new();
    exts.extend_from_slice(&be16(0x000b)); // ec_point_formats
    exts.extend_from_slice(&be16(2));
    exts.extend_from_slice(&[0x01, 0x00]);
    if let Some(name) = sni {
        let n = name.as_bytes();
        exts.extend_from_slice(&be16(0x0000)); // server_name
        exts.extend_from_slice(&be16((n.len() + 5) as u16));
        exts.extend_from_slice(&be16((n.len() + 3) as u16));
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
    hs.extend_from_slice(&be16(body.len() as u16));
    hs.extend_from_slice(&body);

    let mut rec = vec![0x16, 0x03, 0x01];
    rec.extend_from_slice(&be16(hs.len() as u16));
    rec.extend_from_slice(&hs);
    rec
}

/// Accepts one connection, reads exactly `expect` bytes, writes `reply`,
/// waits for the peer to finish, and hands back what it received.
pub fn spawn_backend(
    expect: usize,
    reply: &'static [u8],
) -> (net::SocketAddr, thread::JoinHandle<Vec<u8>>) {
    let listener = net::TcpListener::bind("127.0.0.1:0").expect("could not bind mock backend");
    let addr = listener.local_addr().unwrap();
    let handle = thread::spawn(move || {
        let (mut sock, _) = listener.accept().expect("mock backend accept failed");
        let mut buf = vec![0; expect];
        sock.read_exact(&mut buf).expect("mock backend short read");
        if !reply.is_empty() {
            sock.write_all(reply).expect("mock backend write failed");
        }
        // Wait for the proxy to close its half before going away.
        let mut rest = Vec::new();
        let _ = sock.read_to_end(&mut rest);
        buf
    });
    (addr, handle)
}

/// A port that nothing is listening on.
pub fn refused_addr() -> net::SocketAddr {
    let listener = net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}
