extern crate env_logger;
extern crate futures;
extern crate sniroute;
extern crate tokio_core;

mod support;

use futures::sync::oneshot;
use futures::{Async, Future, Poll};
use sniroute::{Address, Backend, Protocol, Server, Table};
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::rc::Rc;
use std::thread;
use std::time;
use support::{client_hello, refused_addr, spawn_backend};
use tokio_core::reactor::Core;

fn table(routes: &[(&str, SocketAddr)]) -> Rc<Table> {
    let mut t = Table::new(None);
    for &(hostname, addr) in routes {
        t.add(Backend::new(hostname, Address::Inet(addr)));
    }
    Rc::new(t)
}

/// Binds a proxy on an ephemeral port and spawns it on the core.
fn spawn_proxy(
    core: &Core,
    protocol: Protocol,
    table: Rc<Table>,
    fallback: Option<Address>,
) -> SocketAddr {
    let handle = core.handle();
    let any = "127.0.0.1:0".parse().unwrap();
    let server = Server::bind(&any, protocol, table, fallback, &handle)
        .expect("could not bind proxy listener");
    let addr = server.local_addr();
    handle.spawn(server.map_err(|_| ()));
    addr
}

#[test]
fn tls_sni_routes_and_relays_both_directions() {
    drop(env_logger::init());

    let hello = client_hello(Some("example.com"));
    let reply = b"0123456789abcdef";
    let (backend_addr, backend) = spawn_backend(hello.len(), reply);

    let mut core = Core::new().unwrap();
    let proxy = spawn_proxy(
        &core,
        Protocol::Tls,
        table(&[("example.com", backend_addr)]),
        None,
    );

    let (tx, rx) = oneshot::channel::<()>();
    let sent = hello.clone();
    let client = thread::spawn(move || {
        let mut sock = TcpStream::connect(&proxy).unwrap();
        sock.write_all(&sent).unwrap();
        let mut got = vec![0; reply.len()];
        sock.read_exact(&mut got).unwrap();
        tx.send(()).unwrap();
        got
    });

    core.run(rx).unwrap();
    let got = client.join().unwrap();
    assert_eq!(got, &reply[..]);
    let received = backend.join().unwrap();
    assert_eq!(received, hello);
}

#[test]
fn http_host_routes_and_forwards_the_peeked_bytes() {
    drop(env_logger::init());

    let request = b"GET / HTTP/1.1\r\nHost: foo.test\r\n\r\n";
    let reply = b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\nhi";
    let (backend_addr, backend) = spawn_backend(request.len(), reply);

    let mut core = Core::new().unwrap();
    let proxy = spawn_proxy(
        &core,
        Protocol::Http,
        table(&[("foo.test", backend_addr)]),
        None,
    );

    let (tx, rx) = oneshot::channel::<()>();
    let client = thread::spawn(move || {
        let mut sock = TcpStream::connect(&proxy).unwrap();
        sock.write_all(request).unwrap();
        let mut got = vec![0; reply.len()];
        sock.read_exact(&mut got).unwrap();
        tx.send(()).unwrap();
        got
    });

    core.run(rx).unwrap();
    assert_eq!(client.join().unwrap(), &reply[..]);
    assert_eq!(backend.join().unwrap(), &request[..]);
}

#[test]
fn missing_sni_uses_the_listener_fallback() {
    drop(env_logger::init());

    let hello = client_hello(None);
    let reply = b"fallback says hi";
    let (backend_addr, backend) = spawn_backend(hello.len(), reply);

    let mut core = Core::new().unwrap();
    let proxy = spawn_proxy(
        &core,
        Protocol::Tls,
        table(&[]),
        Some(Address::Inet(backend_addr)),
    );

    let (tx, rx) = oneshot::channel::<()>();
    let sent = hello.clone();
    let client = thread::spawn(move || {
        let mut sock = TcpStream::connect(&proxy).unwrap();
        sock.write_all(&sent).unwrap();
        let mut got = vec![0; reply.len()];
        sock.read_exact(&mut got).unwrap();
        tx.send(()).unwrap();
        got
    });

    core.run(rx).unwrap();
    assert_eq!(client.join().unwrap(), &reply[..]);
    assert_eq!(backend.join().unwrap(), hello);
}

#[test]
fn unmatched_hostname_without_fallback_closes_the_client() {
    drop(env_logger::init());

    let mut core = Core::new().unwrap();
    let proxy = spawn_proxy(&core, Protocol::Tls, table(&[]), None);

    let (tx, rx) = oneshot::channel::<()>();
    let client = thread::spawn(move || {
        let mut sock = TcpStream::connect(&proxy).unwrap();
        sock.write_all(&client_hello(Some("unknown.test"))).unwrap();
        let mut rest = Vec::new();
        let n = sock.read_to_end(&mut rest).unwrap_or(0);
        tx.send(()).unwrap();
        n
    });

    core.run(rx).unwrap();
    assert_eq!(client.join().unwrap(), 0);
}

#[test]
fn client_eof_after_the_hello_still_reaches_the_backend() {
    drop(env_logger::init());

    let hello = client_hello(Some("example.com"));
    let (backend_addr, backend) = spawn_backend(hello.len(), b"");

    let mut core = Core::new().unwrap();
    let proxy = spawn_proxy(
        &core,
        Protocol::Tls,
        table(&[("example.com", backend_addr)]),
        None,
    );

    let (tx, rx) = oneshot::channel::<()>();
    let sent = hello.clone();
    let client = thread::spawn(move || {
        let mut sock = TcpStream::connect(&proxy).unwrap();
        sock.write_all(&sent).unwrap();
        sock.shutdown(Shutdown::Write).unwrap();
        let mut rest = Vec::new();
        let _ = sock.read_to_end(&mut rest);
        tx.send(()).unwrap();
    });

    core.run(rx).unwrap();
    client.join().unwrap();
    // The backend saw every byte, then EOF once the client ring drained.
    assert_eq!(backend.join().unwrap(), hello);
}

#[test]
fn refused_backend_closes_the_client_without_stray_bytes() {
    drop(env_logger::init());

    let backend_addr = refused_addr();
    let mut core = Core::new().unwrap();
    let proxy = spawn_proxy(
        &core,
        Protocol::Tls,
        table(&[("example.com", backend_addr)]),
        None,
    );

    let (tx, rx) = oneshot::channel::<()>();
    let client = thread::spawn(move || {
        let mut sock = TcpStream::connect(&proxy).unwrap();
        sock.write_all(&client_hello(Some("example.com"))).unwrap();
        let mut rest = Vec::new();
        let n = sock.read_to_end(&mut rest).unwrap_or(0);
        tx.send(()).unwrap();
        n
    });

    core.run(rx).unwrap();
    assert_eq!(client.join().unwrap(), 0);
}

/// Runs the proxy until the signal fires, then hands the server back so
/// the test can inspect and tear down its registry.
struct Running {
    server: Option<Server>,
    stop: oneshot::Receiver<()>,
}

impl Future for Running {
    type Item = Server;
    type Error = ();

    fn poll(&mut self) -> Poll<Server, ()> {
        {
            let server = self.server.as_mut().expect("polled after completion");
            let _ = server.poll().map_err(|_| ())?;
        }
        match self.stop.poll() {
            Ok(Async::Ready(())) => Ok(Async::Ready(self.server.take().unwrap())),
            Ok(Async::NotReady) => Ok(Async::NotReady),
            Err(_) => Err(()),
        }
    }
}

#[test]
fn shutdown_empties_the_registry_and_closes_clients() {
    drop(env_logger::init());

    let mut core = Core::new().unwrap();
    let handle = core.handle();
    let any = "127.0.0.1:0".parse().unwrap();
    let server = Server::bind(&any, Protocol::Tls, table(&[]), None, &handle).unwrap();
    let proxy = server.local_addr();

    let (tx, rx) = oneshot::channel::<()>();
    let client = thread::spawn(move || {
        let mut sock = TcpStream::connect(&proxy).unwrap();
        // A partial hello parks the connection in ACCEPTED.
        sock.write_all(&[0x16, 0x03, 0x01]).unwrap();
        thread::sleep(time::Duration::from_millis(200));
        tx.send(()).unwrap();
        let mut rest = Vec::new();
        let n = sock.read_to_end(&mut rest).unwrap_or(0);
        n
    });

    let mut server = core
        .run(Running {
            server: Some(server),
            stop: rx,
        })
        .unwrap();

    assert_eq!(server.active(), 1);
    server.print_connections();
    server.free_connections();
    assert_eq!(server.active(), 0);
    assert_eq!(client.join().unwrap(), 0);
}
