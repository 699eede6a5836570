use super::address::Address;
use super::proto::Protocol;
use super::table::{Backend, Table};
use serde_json;
use serde_yaml;
use std::fmt;
use std::fs;
use std::io::{self, Read};
use std::net::SocketAddr;
use std::rc::Rc;

#[derive(Serialize, Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    pub username: Option<String>,
    pub listeners: Vec<ListenerConfig>,
    #[serde(default)]
    pub tables: Vec<TableConfig>,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct ListenerConfig {
    pub addr: String,
    pub port: u16,
    #[serde(default)]
    pub protocol: Protocol,
    pub table: Option<String>,
    pub fallback: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct TableConfig {
    pub name: Option<String>,
    pub routes: Vec<RouteConfig>,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct RouteConfig {
    pub hostname: String,
    pub address: String,
    pub port: Option<u16>,
}

/// Everything a `Server::bind` call needs, resolved and validated.
pub struct ListenerSpec {
    pub addr: SocketAddr,
    pub protocol: Protocol,
    pub table: Rc<Table>,
    pub fallback: Option<Address>,
}

impl AppConfig {
    /// Reads and parses a configuration file.
    pub fn load(path: &str) -> io::Result<AppConfig> {
        let mut text = String::new();
        fs::File::open(path)?.read_to_string(&mut text)?;
        AppConfig::from_str(&text)
    }

    /// Parses a configuration document. A document whose first
    /// non-whitespace byte is a brace is JSON; anything else is YAML.
    pub fn from_str(text: &str) -> io::Result<AppConfig> {
        match text.trim_left().chars().next() {
            Some('{') => serde_json::from_str(text).map_err(bad_config),
            _ => serde_yaml::from_str(text).map_err(bad_config),
        }
    }

    /// Materializes the tables and resolves each listener against them.
    ///
    /// Listener addresses must be socket addresses (a `unix:` listener is
    /// refused: the relay is TCP). A listener naming a missing table is
    /// an error; a listener naming no table gets the unnamed table if one
    /// exists, otherwise an empty one (so only its fallback can route).
    pub fn mk_listeners(&self) -> io::Result<Vec<ListenerSpec>> {
        let tables: Vec<Rc<Table>> = self
            .tables
            .iter()
            .map(|tc| {
                let mut table = Table::new(tc.name.clone());
                for route in &tc.routes {
                    let address = Address::parse(&route.address, route.port.unwrap_or(0));
                    table.add(Backend::new(&route.hostname, address));
                }
                Rc::new(table)
            })
            .collect();

        let mut specs = Vec::with_capacity(self.listeners.len());
        for lc in &self.listeners {
            let addr = match Address::parse(&lc.addr, lc.port).sockaddr() {
                Some(sa) => sa,
                None => {
                    return Err(bad_config(format!(
                        "listener address {} is not a socket address",
                        lc.addr
                    )));
                }
            };
            let table = match lc.table {
                Some(ref name) => match tables
                    .iter()
                    .find(|t| t.name() == Some(name.as_str()))
                {
                    Some(table) => table.clone(),
                    None => return Err(bad_config(format!("no table named {}", name))),
                },
                None => tables
                    .iter()
                    .find(|t| t.name().is_none())
                    .cloned()
                    .unwrap_or_else(|| Rc::new(Table::new(None))),
            };
            let fallback = lc.fallback.as_ref().map(|f| Address::parse(f, 0));
            specs.push(ListenerSpec {
                addr: addr,
                protocol: lc.protocol,
                table: table,
                fallback: fallback,
            });
        }
        Ok(specs)
    }
}

fn bad_config<E: fmt::Display>(e: E) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e.to_string())
}
