//! Binds node indices to network endpoints and picks the bootstrap node.

use crate::identity::ValidatorIdentity;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::net::{IpAddr, Ipv6Addr};
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

/// Default devp2p listening port.
pub const DEFAULT_P2P_PORT: u16 = 30303;
/// URI scheme of discovery addresses.
pub const DISCOVERY_SCHEME: &str = "enode";

/// Errors raised while binding the topology.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopologyError {
    #[error("endpoint table has {available} entries but {required} nodes need an endpoint")]
    /// The endpoint table cannot cover every node.
    TableTooShort {
        /// Validators plus observers.
        required: usize,
        /// Entries in the table.
        available: usize,
    },
    #[error("invalid endpoint '{0}'")]
    /// An endpoint entry could not be parsed.
    InvalidEndpoint(String),
}

/// One row of the externally supplied index→host table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointEntry {
    /// IP address or hostname.
    pub host: String,
    /// Peer-to-peer port.
    pub p2p_port: u16,
}

impl EndpointEntry {
    /// Entry on the default p2p port.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            p2p_port: DEFAULT_P2P_PORT,
        }
    }

    /// `host:port`, with IPv6 hosts in brackets.
    pub fn authority(&self) -> String {
        authority(&self.host, self.p2p_port)
    }
}

impl fmt::Display for EndpointEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.authority())
    }
}

impl FromStr for EndpointEntry {
    type Err = TopologyError;

    /// Parses `host`, `host:port`, a bare IP address or `[ipv6]:port`.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        let invalid = || TopologyError::InvalidEndpoint(raw.to_string());
        let parse_port = |port: &str| match port.parse::<u16>() {
            Ok(port) if port != 0 => Ok(port),
            _ => Err(invalid()),
        };

        let (host, port) = if let Some(rest) = raw.strip_prefix('[') {
            let (inner, tail) = rest.split_once(']').ok_or_else(invalid)?;
            let ip = inner.parse::<Ipv6Addr>().map_err(|_| invalid())?;
            let port = match tail {
                "" => DEFAULT_P2P_PORT,
                tail => parse_port(tail.strip_prefix(':').ok_or_else(invalid)?)?,
            };
            (ip.to_string(), port)
        } else if let Ok(ip) = raw.parse::<IpAddr>() {
            (ip.to_string(), DEFAULT_P2P_PORT)
        } else {
            let (host, port) = match raw.split_once(':') {
                Some((host, port)) => (host, parse_port(port)?),
                None => (raw, DEFAULT_P2P_PORT),
            };
            if !is_valid_host(host) {
                return Err(invalid());
            }
            (host.to_string(), port)
        };
        Ok(Self {
            host,
            p2p_port: port,
        })
    }
}

/// DNS name or IPv4 literal: dot-separated labels of ASCII letters, digits
/// and inner hyphens.
fn is_valid_host(host: &str) -> bool {
    !host.is_empty()
        && host.len() <= 253
        && host.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
        })
}

fn authority(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

impl Serialize for EndpointEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EndpointEntry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A node's bound network location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkEndpoint {
    /// 1-based node index.
    pub index: usize,
    /// IP address or hostname.
    pub host: String,
    /// Peer-to-peer port.
    pub p2p_port: u16,
    /// `enode://` URI. Only validators have a pre-generated key, so observers carry none.
    pub discovery_uri: Option<String>,
}

/// Bound endpoints for every node plus the designated bootstrap node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    /// Validators first (`1..=N`), then observers.
    pub endpoints: Vec<NetworkEndpoint>,
    /// 1-based index of the bootstrap node.
    pub bootstrap_index: usize,
}

impl Topology {
    /// Endpoint for a 1-based node index.
    pub fn endpoint(&self, index: usize) -> Option<&NetworkEndpoint> {
        index
            .checked_sub(1)
            .and_then(|offset| self.endpoints.get(offset))
    }

    /// Discovery URI of the bootstrap node.
    pub fn bootstrap_uri(&self) -> Option<&str> {
        self.endpoint(self.bootstrap_index)
            .and_then(|endpoint| endpoint.discovery_uri.as_deref())
    }
}

/// Formats `enode://<hex pubkey>@<host>:<port>`, bracketing IPv6 hosts.
pub fn discovery_uri(identity: &ValidatorIdentity, host: &str, p2p_port: u16) -> String {
    format!(
        "{DISCOVERY_SCHEME}://{}@{}",
        identity.public_key.to_plain_hex(),
        authority(host, p2p_port)
    )
}

/// Assigns table rows to validators (in index order) and then observers.
/// The bootstrap node is always validator 1.
pub fn bind(
    identities: &[ValidatorIdentity],
    table: &[EndpointEntry],
    observer_count: usize,
) -> Result<Topology, TopologyError> {
    let required = identities.len() + observer_count;
    if table.len() < required {
        return Err(TopologyError::TableTooShort {
            required,
            available: table.len(),
        });
    }

    let mut endpoints = Vec::with_capacity(required);
    for (identity, entry) in identities.iter().zip(table) {
        let uri = discovery_uri(identity, &entry.host, entry.p2p_port);
        debug!(index = identity.index, endpoint = %entry, "validator endpoint bound");
        endpoints.push(NetworkEndpoint {
            index: identity.index,
            host: entry.host.clone(),
            p2p_port: entry.p2p_port,
            discovery_uri: Some(uri),
        });
    }
    for (offset, entry) in table[identities.len()..required].iter().enumerate() {
        let index = identities.len() + offset + 1;
        debug!(index, endpoint = %entry, "observer endpoint bound");
        endpoints.push(NetworkEndpoint {
            index,
            host: entry.host.clone(),
            p2p_port: entry.p2p_port,
            discovery_uri: None,
        });
    }

    Ok(Topology {
        endpoints,
        bootstrap_index: 1,
    })
}
