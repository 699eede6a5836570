//! Event-loop integration: one bound listener, its accept handler, and
//! the registry of live connections it drives.

use super::address::Address;
use super::connection::Connection;
use super::listener::Listener;
use super::proto::Protocol;
use super::table::Table;
use futures::{Async, Future, Poll, Stream};
use libc;
use std::collections::VecDeque;
use std::env;
use std::ffi::OsString;
use std::fs;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::os::unix::ffi::OsStringExt;
use std::os::unix::io::FromRawFd;
use std::path::PathBuf;
use std::rc::Rc;
use tokio_core::net::{Incoming, TcpListener};
use tokio_core::reactor::Handle;

/// A bound listening socket plus the connections it has accepted.
///
/// The registry keeps the most recently serviced connection at the head,
/// so the tail is always the least recently active flow; an idle reaper
/// could walk it from the back.
pub struct Server {
    listener: Rc<Listener>,
    local_addr: SocketAddr,
    incoming: Incoming,
    handle: Handle,
    connections: VecDeque<Connection>,
}

impl Server {
    pub fn bind(
        addr: &SocketAddr,
        protocol: Protocol,
        table: Rc<Table>,
        fallback: Option<Address>,
        handle: &Handle,
    ) -> io::Result<Server> {
        let socket = TcpListener::bind(addr, handle)?;
        let local_addr = socket.local_addr()?;
        info!("listening on {} ({})", local_addr, protocol.name());
        Ok(Server {
            listener: Rc::new(Listener::new(local_addr, protocol, table, fallback)),
            local_addr: local_addr,
            incoming: socket.incoming(),
            handle: handle.clone(),
            connections: VecDeque::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn listener(&self) -> &Rc<Listener> {
        &self.listener
    }

    /// Live connections in the registry.
    pub fn active(&self) -> usize {
        self.connections.len()
    }

    /// Accepts every pending connection. New connections enter at the
    /// head of the registry. A failed accept abandons that one operation.
    fn accept(&mut self) -> bool {
        loop {
            match self.incoming.poll() {
                Ok(Async::Ready(Some((socket, peer)))) => {
                    debug!("accepted connection from {} on {}", peer, self.local_addr);
                    let conn = Connection::accepted(
                        socket,
                        peer,
                        self.listener.clone(),
                        self.handle.clone(),
                    );
                    self.connections.push_front(conn);
                }
                Ok(Async::Ready(None)) => return true,
                Ok(Async::NotReady) => return false,
                Err(e) => {
                    warn!("accept on {} failed: {}", self.local_addr, e);
                    return false;
                }
            }
        }
    }

    /// Drives every connection once. Connections that made progress move
    /// to the head, most recently serviced first; closed ones are dropped.
    fn sweep(&mut self) {
        let mut active = Vec::new();
        let mut idle = VecDeque::with_capacity(self.connections.len());
        while let Some(mut conn) = self.connections.pop_front() {
            let progressed = conn.drive();
            if conn.is_closed() {
                continue;
            }
            debug_assert!(conn.client_open() || conn.server_open());
            if progressed {
                active.push(conn);
            } else {
                idle.push_back(conn);
            }
        }
        for conn in active {
            idle.push_front(conn);
        }
        self.connections = idle;
    }

    /// Forced close of every registered connection; safe after the loop
    /// has stopped dispatching events. The registry ends up empty.
    pub fn free_connections(&mut self) {
        while let Some(mut conn) = self.connections.pop_front() {
            conn.force_close();
        }
    }

    /// Writes a snapshot of the registry to a fresh temp file and logs
    /// its path.
    pub fn print_connections(&self) {
        let template = env::temp_dir().join("sniroute-connections-XXXXXX");
        let mut template: Vec<u8> = template.into_os_string().into_vec();
        template.push(0);
        let fd = unsafe { libc::mkstemp(template.as_mut_ptr() as *mut libc::c_char) };
        if fd < 0 {
            warn!("mkstemp failed: {}", io::Error::last_os_error());
            return;
        }
        template.pop();
        let path = PathBuf::from(OsString::from_vec(template));
        let mut file = unsafe { fs::File::from_raw_fd(fd) };
        if let Err(e) = self.dump(&mut file) {
            warn!("failed to dump connections: {}", e);
            return;
        }
        info!(
            "dumped {} connections to {}",
            self.connections.len(),
            path.display()
        );
    }

    fn dump<W: Write>(&self, w: &mut W) -> io::Result<()> {
        writeln!(w, "Running connections:")?;
        for conn in &self.connections {
            conn.render(w)?;
        }
        Ok(())
    }
}

impl Future for Server {
    type Item = ();
    type Error = io::Error;

    fn poll(&mut self) -> Poll<(), io::Error> {
        trace!("poll {}", self.local_addr);
        let done = self.accept();
        self.sweep();
        if done && self.connections.is_empty() {
            return Ok(Async::Ready(()));
        }
        Ok(Async::NotReady)
    }
}
