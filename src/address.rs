//! Server addresses and connection URL parsing.

use std::collections::HashMap;
use std::fmt;

use crate::error::BoltError;

/// A host + port, normalized to a stable string key (`host:port`) used
/// as the pool and routing table key everywhere in this crate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerAddress {
    host: String,
    port: u16,
}

/// Default Bolt port when a connection URL omits one.
pub const DEFAULT_PORT: u16 = 7687;

impl ServerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        ServerAddress {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The stable key used by the pool and routing table.
    pub fn key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Inverse of [`ServerAddress::key`], for callers (the pool's
    /// `keepAll`/`close`) that only have the string key on hand.
    pub fn from_key(key: &str) -> Self {
        match key.rsplit_once(':') {
            Some((host, port)) => ServerAddress::new(host, port.parse().unwrap_or(DEFAULT_PORT)),
            None => ServerAddress::new(key, DEFAULT_PORT),
        }
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// The transport + trust policy selected by a connection URL's scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// `bolt://` — plain, direct connection, no routing.
    Plain,
    /// `bolt+s://` — TLS with full certificate verification, direct.
    Encrypted,
    /// `bolt+ssc://` — TLS with trust-on-first-use, direct.
    EncryptedSelfSigned,
    /// `neo4j://` — plain, routing driver.
    RoutingPlain,
    /// `neo4j+s://` — TLS with full certificate verification, routing.
    RoutingEncrypted,
    /// `neo4j+ssc://` — TLS with trust-on-first-use, routing.
    RoutingEncryptedSelfSigned,
}

impl Scheme {
    pub fn is_routing(self) -> bool {
        matches!(
            self,
            Scheme::RoutingPlain | Scheme::RoutingEncrypted | Scheme::RoutingEncryptedSelfSigned
        )
    }

    pub fn is_encrypted(self) -> bool {
        matches!(
            self,
            Scheme::Encrypted
                | Scheme::EncryptedSelfSigned
                | Scheme::RoutingEncrypted
                | Scheme::RoutingEncryptedSelfSigned
        )
    }

    fn parse(s: &str) -> Option<Scheme> {
        Some(match s {
            "bolt" => Scheme::Plain,
            "bolt+s" => Scheme::Encrypted,
            "bolt+ssc" => Scheme::EncryptedSelfSigned,
            "neo4j" => Scheme::RoutingPlain,
            "neo4j+s" => Scheme::RoutingEncrypted,
            "neo4j+ssc" => Scheme::RoutingEncryptedSelfSigned,
            _ => return None,
        })
    }
}

/// A fully parsed connection URL: scheme, seed address, and the routing
/// context carried in the query string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionUrl {
    pub scheme: Scheme,
    pub address: ServerAddress,
    /// Routing context forwarded to the server on `ROUTE`/`HELLO`.
    /// Duplicate keys and empty keys/values are rejected at parse time.
    pub routing_context: HashMap<String, String>,
}

/// Parse a Bolt connection URL of the form
/// `scheme://host[:port][?key=value&...]`.
pub fn parse_url(url: &str) -> Result<ConnectionUrl, BoltError> {
    let invalid = |reason: &str| BoltError::InvalidUrl {
        url: url.to_owned(),
        reason: reason.to_owned(),
    };

    let (scheme_str, rest) = url.split_once("://").ok_or_else(|| invalid("missing scheme"))?;
    let scheme = Scheme::parse(scheme_str)
        .ok_or_else(|| invalid(&format!("unrecognized scheme '{scheme_str}'")))?;

    let (authority, query) = match rest.split_once('?') {
        Some((a, q)) => (a, Some(q)),
        None => (rest, None),
    };
    if authority.is_empty() {
        return Err(invalid("missing host"));
    }

    let (host, port) = match authority.split_once(':') {
        Some((h, p)) => {
            let port: u16 = p
                .parse()
                .map_err(|_| invalid(&format!("invalid port '{p}'")))?;
            (h, port)
        }
        None => (authority, DEFAULT_PORT),
    };
    if host.is_empty() {
        return Err(invalid("missing host"));
    }

    let mut routing_context = HashMap::new();
    if let Some(query) = query {
        if !query.is_empty() {
            for pair in query.split('&') {
                let (k, v) = pair
                    .split_once('=')
                    .ok_or_else(|| invalid(&format!("malformed query pair '{pair}'")))?;
                if k.is_empty() || v.is_empty() {
                    return Err(invalid("empty query key or value"));
                }
                if routing_context.contains_key(k) {
                    return Err(invalid(&format!("duplicate query key '{k}'")));
                }
                routing_context.insert(k.to_owned(), v.to_owned());
            }
        }
    }

    Ok(ConnectionUrl {
        scheme,
        address: ServerAddress::new(host, port),
        routing_context,
    })
}
