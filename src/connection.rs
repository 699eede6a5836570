//! The per-flow state machine: accept, peek and parse, route, connect,
//! then relay bidirectionally until both halves are done.

use super::buffer::Buffer;
use super::listener::Listener;
use super::proto::Parsed;
use futures::{Async, Future};
use std::io::{self, Read, Write};
use std::mem;
use std::net::SocketAddr;
use std::rc::Rc;
use tokio_core::net::{TcpStream, TcpStreamNew};
use tokio_core::reactor::Handle;

/// One Ethernet MSS: the dissectors never see more than this, no matter
/// how much the ring holds.
const PEEK_WINDOW: usize = 1460;

/// One side of a flow: its socket and the ring of bytes received from it
/// (and still owed to the opposite socket).
struct Half {
    socket: TcpStream,
    buf: Buffer,
}

impl Half {
    fn new(socket: TcpStream) -> Half {
        Half {
            socket: socket,
            buf: Buffer::new(),
        }
    }
}

/// Which sockets are open is derived from the tag, never tracked
/// separately.
enum State {
    /// Client socket only; reading and re-parsing the peeked prefix.
    /// Parsing, routing, and connect initiation all happen in one drive
    /// pass, so the parsed/resolved steps never persist across turns.
    Accepted { client: Half },
    /// Backend connect in flight. The pending connect registers the
    /// wakeup; the client ring keeps whatever has been read so far.
    Connecting { client: Half, connect: TcpStreamNew },
    /// Full duplex relay under ring-occupancy backpressure.
    Connected { client: Half, server: Half },
    /// Client socket gone. Its ring still drains to the server, and the
    /// server keeps being read while its own ring has room.
    ClientClosed { server: Half, client_buf: Buffer },
    /// Server socket gone. Its ring still drains to the client.
    ServerClosed { client: Half, server_buf: Buffer },
    /// Both sockets released; the registry drops the connection.
    Closed,
}

pub struct Connection {
    state: State,
    listener: Rc<Listener>,
    handle: Handle,
    peer: SocketAddr,
    hostname: Option<String>,
    backend: Option<SocketAddr>,
}

impl Connection {
    /// Wraps a freshly accepted client socket. The first drive pass arms
    /// the read side.
    pub fn accepted(
        socket: TcpStream,
        peer: SocketAddr,
        listener: Rc<Listener>,
        handle: Handle,
    ) -> Connection {
        Connection {
            state: State::Accepted {
                client: Half::new(socket),
            },
            listener: listener,
            handle: handle,
            peer: peer,
            hostname: None,
            backend: None,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_ref().map(|h| h.as_str())
    }

    pub fn is_closed(&self) -> bool {
        match self.state {
            State::Closed => true,
            _ => false,
        }
    }

    pub fn client_open(&self) -> bool {
        match self.state {
            State::Accepted { .. }
            | State::Connecting { .. }
            | State::Connected { .. }
            | State::ServerClosed { .. } => true,
            _ => false,
        }
    }

    pub fn server_open(&self) -> bool {
        match self.state {
            State::Connected { .. } | State::ClientClosed { .. } => true,
            _ => false,
        }
    }

    pub fn state_name(&self) -> &'static str {
        match self.state {
            State::Accepted { .. } => "ACCEPTED",
            State::Connecting { .. } => "CONNECTING",
            State::Connected { .. } => "CONNECTED",
            State::ClientClosed { .. } => "CLIENT_CLOSED",
            State::ServerClosed { .. } => "SERVER_CLOSED",
            State::Closed => "CLOSED",
        }
    }

    /// Advances the state machine as far as the sockets allow. Returns
    /// true if any progress was made (bytes moved or a transition taken);
    /// the registry moves such connections to its head.
    ///
    /// Must run within a reactor task: blocked reads and writes register
    /// the current task for wakeup.
    pub fn drive(&mut self) -> bool {
        let mut progress = false;
        loop {
            let state = mem::replace(&mut self.state, State::Closed);
            let (next, moved) = match state {
                State::Accepted { client } => self.drive_accepted(client),
                State::Connecting { client, connect } => self.drive_connecting(client, connect),
                State::Connected { client, server } => self.drive_connected(client, server),
                State::ClientClosed { server, client_buf } => {
                    self.drive_client_closed(server, client_buf)
                }
                State::ServerClosed { client, server_buf } => {
                    self.drive_server_closed(client, server_buf)
                }
                State::Closed => (State::Closed, false),
            };
            self.state = next;
            if !moved {
                break;
            }
            progress = true;
            if self.is_closed() {
                break;
            }
        }
        progress
    }

    fn drive_accepted(&mut self, mut client: Half) -> (State, bool) {
        // One read per pass, parse between reads: an EOF queued behind a
        // complete request must not be seen before the request parses.
        // The drive loop re-enters while progress is made.
        let mut moved = 0;
        if client.buf.room() > 0 {
            loop {
                match client.buf.read_from(&mut client.socket) {
                    Ok(0) => {
                        debug!("{}: client closed before a request arrived", self.peer);
                        return (State::Closed, true);
                    }
                    Ok(n) => moved += n,
                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {}
                    Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        warn!("recv() from {}: {}, closing connection", self.peer, e);
                        return (State::Closed, true);
                    }
                }
                break;
            }
        }

        let mut window = [0; PEEK_WINDOW];
        let len = client.buf.peek(&mut window);
        if len == 0 {
            return (State::Accepted { client: client }, moved > 0);
        }

        let parsed = self.listener.parse_packet(&window[..len]);
        trace!("{}: dissector returned {:?} on {} bytes", self.peer, parsed, len);
        match parsed {
            Parsed::Hostname(name) => {
                debug!("{} requested {}", self.peer, name);
                self.hostname = Some(name);
            }
            Parsed::Incomplete => {
                if client.buf.room() > 0 {
                    return (State::Accepted { client: client }, moved > 0);
                }
                // The window is smaller than the ring, so more bytes
                // cannot change the outcome.
                warn!("request from {} did not fit the inspection window", self.peer);
                if self.listener.fallback().is_none() {
                    return (State::Closed, true);
                }
            }
            Parsed::NoHostname => {
                info!("request from {} did not include a hostname", self.peer);
                if self.listener.fallback().is_none() {
                    return (State::Closed, true);
                }
            }
            Parsed::Malformed => {
                warn!("unable to parse request from {}", self.peer);
                if self.listener.fallback().is_none() {
                    return (State::Closed, true);
                }
            }
        }

        // Route and initiate the backend connection in the same pass.
        let hostname = self.hostname.clone();
        let address = match self.listener.route(hostname.as_ref().map(|h| h.as_str())) {
            Some(address) => address,
            None => {
                info!(
                    "no backend for {} requested by {}",
                    hostname.unwrap_or_else(|| "<none>".to_owned()),
                    self.peer
                );
                return (State::Closed, true);
            }
        };
        let sa = match address.sockaddr() {
            Some(sa) => sa,
            None => {
                warn!(
                    "backend {} for {} is not an address; DNS lookups are not supported",
                    address, self.peer
                );
                return (State::Closed, true);
            }
        };
        self.backend = Some(sa);
        debug!("{}: connecting to {}", self.peer, sa);
        let connect = TcpStream::connect(&sa, &self.handle);
        (
            State::Connecting {
                client: client,
                connect: connect,
            },
            true,
        )
    }

    fn drive_connecting(&mut self, client: Half, mut connect: TcpStreamNew) -> (State, bool) {
        match connect.poll() {
            Ok(Async::NotReady) => (
                State::Connecting {
                    client: client,
                    connect: connect,
                },
                false,
            ),
            Ok(Async::Ready(socket)) => {
                let backend = self.backend.expect("connecting without a backend address");
                debug!("{}: connected to {}", self.peer, backend);
                (
                    State::Connected {
                        client: client,
                        server: Half::new(socket),
                    },
                    true,
                )
            }
            Err(e) => {
                let backend = self.backend.expect("connecting without a backend address");
                warn!("failed to open connection to {}: {}", backend, e);
                (
                    State::ServerClosed {
                        client: client,
                        server_buf: Buffer::new(),
                    },
                    true,
                )
            }
        }
    }

    fn drive_connected(&mut self, mut client: Half, mut server: Half) -> (State, bool) {
        let mut moved = 0;

        // Client half: receive first, then flush the server ring back.
        match pump_in(&mut client.buf, &mut client.socket) {
            Ok((n, eof)) => {
                moved += n;
                if eof {
                    debug!("{}: client closed", self.peer);
                    return (
                        State::ClientClosed {
                            server: server,
                            client_buf: client.buf,
                        },
                        true,
                    );
                }
            }
            Err(e) => {
                warn!("recv() from {}: {}, closing connection", self.peer, e);
                return (
                    State::ClientClosed {
                        server: server,
                        client_buf: client.buf,
                    },
                    true,
                );
            }
        }
        if server.buf.len() > 0 {
            match pump_out(&mut server.buf, &mut client.socket) {
                Ok(n) => moved += n,
                Err(e) => {
                    warn!("send() to {}: {}, closing connection", self.peer, e);
                    return (
                        State::ClientClosed {
                            server: server,
                            client_buf: client.buf,
                        },
                        true,
                    );
                }
            }
        }

        // Server half.
        match pump_in(&mut server.buf, &mut server.socket) {
            Ok((n, eof)) => {
                moved += n;
                if eof {
                    debug!("{}: server closed", self.peer);
                    return (
                        State::ServerClosed {
                            client: client,
                            server_buf: server.buf,
                        },
                        true,
                    );
                }
            }
            Err(e) => {
                warn!(
                    "recv() from backend for {}: {}, closing connection",
                    self.peer, e
                );
                return (
                    State::ServerClosed {
                        client: client,
                        server_buf: server.buf,
                    },
                    true,
                );
            }
        }
        if client.buf.len() > 0 {
            match pump_out(&mut client.buf, &mut server.socket) {
                Ok(n) => moved += n,
                Err(e) => {
                    warn!(
                        "send() to backend for {}: {}, closing connection",
                        self.peer, e
                    );
                    return (
                        State::ServerClosed {
                            client: client,
                            server_buf: server.buf,
                        },
                        true,
                    );
                }
            }
        }

        (
            State::Connected {
                client: client,
                server: server,
            },
            moved > 0,
        )
    }

    fn drive_client_closed(&mut self, mut server: Half, mut client_buf: Buffer) -> (State, bool) {
        let mut moved = 0;

        // The server is still read while its ring has room, even though
        // those bytes can no longer be delivered; a full ring parks the
        // read just as it would on a live flow.
        match pump_in(&mut server.buf, &mut server.socket) {
            Ok((n, eof)) => {
                moved += n;
                if eof {
                    self.log_close(client_buf.total_out(), server.buf.total_out());
                    return (State::Closed, true);
                }
            }
            Err(e) => {
                warn!(
                    "recv() from backend for {}: {}, closing connection",
                    self.peer, e
                );
                self.log_close(client_buf.total_out(), server.buf.total_out());
                return (State::Closed, true);
            }
        }

        if client_buf.len() > 0 {
            match pump_out(&mut client_buf, &mut server.socket) {
                Ok(n) => moved += n,
                Err(e) => {
                    warn!(
                        "send() to backend for {}: {}, closing connection",
                        self.peer, e
                    );
                    self.log_close(client_buf.total_out(), server.buf.total_out());
                    return (State::Closed, true);
                }
            }
        }

        // The surviving half closes once its outbound ring drains.
        if client_buf.is_empty() {
            self.log_close(client_buf.total_out(), server.buf.total_out());
            return (State::Closed, true);
        }

        (
            State::ClientClosed {
                server: server,
                client_buf: client_buf,
            },
            moved > 0,
        )
    }

    fn drive_server_closed(&mut self, mut client: Half, mut server_buf: Buffer) -> (State, bool) {
        let mut moved = 0;

        match pump_in(&mut client.buf, &mut client.socket) {
            Ok((n, eof)) => {
                moved += n;
                if eof {
                    self.log_close(client.buf.total_out(), server_buf.total_out());
                    return (State::Closed, true);
                }
            }
            Err(e) => {
                warn!("recv() from {}: {}, closing connection", self.peer, e);
                self.log_close(client.buf.total_out(), server_buf.total_out());
                return (State::Closed, true);
            }
        }

        if server_buf.len() > 0 {
            match pump_out(&mut server_buf, &mut client.socket) {
                Ok(n) => moved += n,
                Err(e) => {
                    warn!("send() to {}: {}, closing connection", self.peer, e);
                    self.log_close(client.buf.total_out(), server_buf.total_out());
                    return (State::Closed, true);
                }
            }
        }

        if server_buf.is_empty() {
            self.log_close(client.buf.total_out(), server_buf.total_out());
            return (State::Closed, true);
        }

        (
            State::ServerClosed {
                client: client,
                server_buf: server_buf,
            },
            moved > 0,
        )
    }

    /// Forced close, used at shutdown: server half first, then client
    /// half, reaching the terminal state from anywhere.
    pub fn force_close(&mut self) {
        match mem::replace(&mut self.state, State::Closed) {
            State::Accepted { client } => drop(client),
            State::Connecting { client, .. } => drop(client),
            State::Connected { client, server } => {
                drop(server);
                drop(client);
            }
            State::ClientClosed { server, .. } => drop(server),
            State::ServerClosed { client, .. } => drop(client),
            State::Closed => return,
        }
        debug!("{}: closed by shutdown", self.peer);
    }

    /// One line of the debug dump: state, then per-half peer and ring
    /// occupancy.
    pub fn render<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let backend = self
            .backend
            .map(|sa| sa.to_string())
            .unwrap_or_else(|| "-".to_owned());
        match self.state {
            State::Accepted { ref client } | State::Connecting { ref client, .. } => writeln!(
                w,
                "{:<13} {} {}/{}\t-",
                self.state_name(),
                self.peer,
                client.buf.len(),
                client.buf.capacity()
            ),
            State::Connected {
                ref client,
                ref server,
            } => writeln!(
                w,
                "{:<13} {} {}/{}\t{} {}/{}",
                self.state_name(),
                self.peer,
                client.buf.len(),
                client.buf.capacity(),
                backend,
                server.buf.len(),
                server.buf.capacity()
            ),
            State::ClientClosed { ref server, .. } => writeln!(
                w,
                "{:<13} -\t{} {}/{}",
                self.state_name(),
                backend,
                server.buf.len(),
                server.buf.capacity()
            ),
            State::ServerClosed { ref client, .. } => writeln!(
                w,
                "{:<13} {} {}/{}\t-",
                self.state_name(),
                self.peer,
                client.buf.len(),
                client.buf.capacity()
            ),
            State::Closed => writeln!(w, "{:<13} -\t-", self.state_name()),
        }
    }

    fn log_close(&self, to_server: u64, to_client: u64) {
        info!(
            "{} ({}): connection closed, {}B to server, {}B to client",
            self.peer,
            self.hostname.as_ref().map(|h| h.as_str()).unwrap_or("-"),
            to_server,
            to_client
        );
    }
}

/// Fills `buf` from `r` until the socket blocks, the peer reaches EOF, or
/// the ring fills. A full ring suppresses the read entirely, so no read
/// interest is registered until the ring drains. Returns bytes moved and
/// whether EOF was seen; transient errors are absorbed.
fn pump_in<R: Read>(buf: &mut Buffer, r: &mut R) -> io::Result<(usize, bool)> {
    let mut total = 0;
    while buf.room() > 0 {
        match buf.read_from(r) {
            Ok(0) => return Ok((total, true)),
            Ok(n) => total += n,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok((total, false))
}

/// Drains `buf` into `w` until it empties or the socket blocks. Only
/// invoked with pending bytes, so write interest follows ring occupancy.
fn pump_out<W: Write>(buf: &mut Buffer, w: &mut W) -> io::Result<usize> {
    let mut total = 0;
    while buf.len() > 0 {
        match buf.write_to(w) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}
