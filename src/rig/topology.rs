//! Cluster topology
//!
//! Turns a `ClusterConfig` into the ordered list of node addresses. Node 0 is the
//! primary, nodes 1..N are secondaries. How a secondary's address is derived from the
//! base host is an `AddressPolicy`; every policy is reversible so a resolved address
//! can be traced back to its node index in logs and diagnostics.

use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use super::config::ClusterConfig;
use super::error::RigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    Primary,
    Secondary,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::Primary => f.write_str("primary"),
            NodeRole::Secondary => f.write_str("secondary"),
        }
    }
}

/// Address of one display node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeAddress {
    pub index: usize,
    pub role: NodeRole,
    pub host: String,
    pub port: u16,
}

impl NodeAddress {
    /// 1-based screen number used by rig deployment scripts
    pub fn screen(&self) -> usize {
        self.index + 1
    }

    pub fn is_primary(&self) -> bool {
        self.role == NodeRole::Primary
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}:{}", self.index, self.host, self.port)
    }
}

/// Derivation of per-node addresses from the base host
pub trait AddressPolicy: Send + Sync {
    /// Address (host, port) of node `index`. Index 0 must map to the base itself.
    fn resolve(&self, base_host: &str, base_port: u16, index: usize)
        -> Result<(String, u16), RigError>;

    /// Inverse of `resolve`
    fn index_of(&self, base_host: &str, base_port: u16, host: &str, port: u16) -> Option<usize>;
}

/// Policy selector stored in the settings file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressPolicyKind {
    #[default]
    NumberedSuffix,
    PortOffset,
}

impl AddressPolicyKind {
    pub fn build(self) -> Box<dyn AddressPolicy> {
        match self {
            AddressPolicyKind::NumberedSuffix => Box::new(NumberedSuffix),
            AddressPolicyKind::PortOffset => Box::new(PortOffset),
        }
    }
}

/// Numbered addresses: `10.0.0.1 -> 10.0.0.2`, `lg1 -> lg2`, `lg -> lg2`
#[derive(Debug, Clone, Copy, Default)]
pub struct NumberedSuffix;

/// Split `lg12` into (`lg`, 12). Returns None when there is no trailing number.
fn split_numeric_suffix(host: &str) -> Option<(&str, u64)> {
    let digits = host.bytes().rev().take_while(u8::is_ascii_digit).count();
    if digits == 0 || digits == host.len() {
        return None;
    }
    let (prefix, number) = host.split_at(host.len() - digits);
    number.parse().ok().map(|n| (prefix, n))
}

impl AddressPolicy for NumberedSuffix {
    fn resolve(
        &self,
        base_host: &str,
        base_port: u16,
        index: usize,
    ) -> Result<(String, u16), RigError> {
        if index == 0 {
            return Ok((base_host.to_string(), base_port));
        }

        if let Ok(ip) = base_host.parse::<Ipv4Addr>() {
            let [a, b, c, d] = ip.octets();
            let last = usize::from(d) + index;
            let last = u8::try_from(last).map_err(|_| {
                RigError::InvalidConfiguration(format!(
                    "node {} would overflow the last octet of {}",
                    index, base_host
                ))
            })?;
            return Ok((Ipv4Addr::new(a, b, c, last).to_string(), base_port));
        }

        let host = match split_numeric_suffix(base_host) {
            Some((prefix, n)) => {
                let number = n.checked_add(index as u64).ok_or_else(|| {
                    RigError::InvalidConfiguration(format!(
                        "node {} would overflow the numeric suffix of {}",
                        index, base_host
                    ))
                })?;
                format!("{}{}", prefix, number)
            }
            None => format!("{}{}", base_host, index + 1),
        };
        Ok((host, base_port))
    }

    fn index_of(&self, base_host: &str, base_port: u16, host: &str, port: u16) -> Option<usize> {
        if port != base_port {
            return None;
        }
        if host == base_host {
            return Some(0);
        }

        if let (Ok(base), Ok(ip)) = (base_host.parse::<Ipv4Addr>(), host.parse::<Ipv4Addr>()) {
            let (b, i) = (base.octets(), ip.octets());
            if b[..3] != i[..3] || i[3] <= b[3] {
                return None;
            }
            return Some(usize::from(i[3] - b[3]));
        }

        match split_numeric_suffix(base_host) {
            Some((prefix, n)) => {
                let (p, m) = split_numeric_suffix(host)?;
                (p == prefix && m > n).then(|| (m - n) as usize)
            }
            None => {
                let suffix: usize = host.strip_prefix(base_host)?.parse().ok()?;
                (suffix >= 2).then(|| suffix - 1)
            }
        }
    }
}

/// Same host for every node, node i listens on `port + i`
#[derive(Debug, Clone, Copy, Default)]
pub struct PortOffset;

impl AddressPolicy for PortOffset {
    fn resolve(
        &self,
        base_host: &str,
        base_port: u16,
        index: usize,
    ) -> Result<(String, u16), RigError> {
        let port = usize::from(base_port) + index;
        let port = u16::try_from(port).map_err(|_| {
            RigError::InvalidConfiguration(format!(
                "node {} would use port {} which is beyond 65535",
                index, port
            ))
        })?;
        Ok((base_host.to_string(), port))
    }

    fn index_of(&self, base_host: &str, base_port: u16, host: &str, port: u16) -> Option<usize> {
        (host == base_host && port >= base_port).then(|| usize::from(port - base_port))
    }
}

/// Validate `config` and derive every node address
pub fn build_topology(
    config: &ClusterConfig,
    policy: &dyn AddressPolicy,
) -> Result<Vec<NodeAddress>, RigError> {
    config.validate()?;
    let host = config.host.trim();

    (0..config.node_count)
        .map(|index| {
            let (host, port) = policy.resolve(host, config.port, index)?;
            Ok(NodeAddress {
                index,
                role: if index == 0 {
                    NodeRole::Primary
                } else {
                    NodeRole::Secondary
                },
                host,
                port,
            })
        })
        .collect()
}
