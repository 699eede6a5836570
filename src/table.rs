use super::address::Address;

/// One routing entry: a hostname pattern and the backend it selects.
///
/// Patterns compare case-insensitively and come in three shapes: an exact
/// hostname, `*.suffix` (one or more leading labels), and the bare `*`
/// catch-all.
#[derive(Clone, Debug)]
pub struct Backend {
    pattern: String,
    address: Address,
}

impl Backend {
    pub fn new(pattern: &str, address: Address) -> Backend {
        Backend {
            pattern: pattern.to_lowercase(),
            address: address,
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    fn matches(&self, hostname: &str) -> bool {
        if self.pattern == "*" {
            return true;
        }
        if self.pattern.starts_with("*.") {
            let suffix = &self.pattern[1..];
            return hostname.len() > suffix.len() && hostname.ends_with(suffix);
        }
        hostname == self.pattern
    }
}

/// An ordered set of backends. Lookups return the first entry whose
/// pattern matches; ordering is the configuration order, so first match
/// is deterministic.
#[derive(Clone, Debug)]
pub struct Table {
    name: Option<String>,
    backends: Vec<Backend>,
}

impl Table {
    pub fn new(name: Option<String>) -> Table {
        Table {
            name: name,
            backends: Vec::new(),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_ref().map(|n| n.as_str())
    }

    pub fn add(&mut self, backend: Backend) {
        self.backends.push(backend);
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn lookup(&self, hostname: &str) -> Option<&Backend> {
        let hostname = hostname.to_lowercase();
        self.backends.iter().find(|b| b.matches(&hostname))
    }
}
