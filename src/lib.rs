//! A transparent proxy that peeks each inbound TCP stream for a
//! destination hostname (TLS SNI or HTTP Host header) and relays it to
//! the backend a static routing table selects.

extern crate futures;
extern crate libc;
#[macro_use]
extern crate log;
extern crate serde;
#[macro_use]
extern crate serde_derive;
extern crate serde_json;
extern crate serde_yaml;
extern crate tokio_core;

pub mod address;
pub mod buffer;
pub mod config;
pub mod connection;
pub mod listener;
pub mod privs;
pub mod proto;
pub mod server;
pub mod table;

pub use address::Address;
pub use buffer::Buffer;
pub use connection::Connection;
pub use listener::Listener;
pub use proto::{Parsed, Protocol};
pub use server::Server;
pub use table::{Backend, Table};
