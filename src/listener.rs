use super::address::Address;
use super::proto::{Parsed, Protocol};
use super::table::Table;
use std::net::SocketAddr;
use std::rc::Rc;

/// Routing capability shared by every connection a bound socket accepts:
/// the expected wire protocol, the routing table, and the fallback backend
/// used when a request carries no hostname.
pub struct Listener {
    addr: SocketAddr,
    protocol: Protocol,
    table: Rc<Table>,
    fallback: Option<Address>,
}

impl Listener {
    pub fn new(
        addr: SocketAddr,
        protocol: Protocol,
        table: Rc<Table>,
        fallback: Option<Address>,
    ) -> Listener {
        Listener {
            addr: addr,
            protocol: protocol,
            table: table,
            fallback: fallback,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn fallback(&self) -> Option<&Address> {
        self.fallback.as_ref()
    }

    pub fn parse_packet(&self, data: &[u8]) -> Parsed {
        self.protocol.parse_packet(data)
    }

    /// Selects a backend address. `None` means the dissector found no
    /// hostname and the fallback (if any) applies directly. Entries and
    /// fallbacks without an explicit port inherit the listener's.
    pub fn route(&self, hostname: Option<&str>) -> Option<Address> {
        let matched = hostname
            .and_then(|h| self.table.lookup(h))
            .map(|b| b.address().clone());
        matched
            .or_else(|| self.fallback.clone())
            .map(|a| a.with_default_port(self.addr.port()))
    }
}
