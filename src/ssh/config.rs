//! SSH Configuration

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::rig::{ClusterConfig, NodeAddress};

/// Transport options shared by every node connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshOptions {
    /// Handshake timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Interval between protocol keepalives
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,

    /// Strict host key checking (default: false)
    /// - true: reject hosts whose fingerprint is not listed
    /// - false: accept and log unknown fingerprints
    #[serde(default)]
    pub strict_host_key_checking: bool,

    /// `SHA256:...` fingerprints that are always trusted
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trusted_fingerprints: Vec<String>,
}

fn default_timeout() -> u64 {
    10
}

fn default_keepalive() -> u64 {
    30
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            keepalive_secs: default_keepalive(),
            strict_host_key_checking: false,
            trusted_fingerprints: Vec::new(),
        }
    }
}

/// Everything needed to reach a single node
#[derive(Clone)]
pub struct SshConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub timeout_secs: u64,
    pub keepalive_secs: u64,
    pub strict_host_key_checking: bool,
    pub trusted_fingerprints: Vec<String>,
}

impl SshConfig {
    pub fn for_node(node: &NodeAddress, cluster: &ClusterConfig, options: &SshOptions) -> Self {
        Self {
            host: node.host.clone(),
            port: node.port,
            username: cluster.username.clone(),
            password: cluster.credential.clone(),
            timeout_secs: options.timeout_secs.max(1),
            keepalive_secs: options.keepalive_secs.max(1),
            strict_host_key_checking: options.strict_host_key_checking,
            trusted_fingerprints: options.trusted_fingerprints.clone(),
        }
    }
}

impl fmt::Debug for SshConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("timeout_secs", &self.timeout_secs)
            .field("strict_host_key_checking", &self.strict_host_key_checking)
            .finish()
    }
}
