//! Cluster configuration

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::RigError;

/// Connection parameters for a whole rig
///
/// The credential is shared by every node. Once handed to the manager the value is
/// never mutated; replacing it goes through `ConnectionManager::configure`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Login user on every node
    pub username: String,

    /// Password for `username`
    pub credential: String,

    /// Address of the primary node, secondaries are derived from it
    pub host: String,

    /// SSH port (default: 22)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Number of display nodes, primary included
    #[serde(default = "default_node_count")]
    pub node_count: usize,
}

fn default_port() -> u16 {
    22
}

fn default_node_count() -> usize {
    3
}

impl ClusterConfig {
    pub fn new(
        username: impl Into<String>,
        credential: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        node_count: usize,
    ) -> Self {
        Self {
            username: username.into(),
            credential: credential.into(),
            host: host.into(),
            port,
            node_count,
        }
    }

    /// Copy with surrounding whitespace stripped from the text fields
    pub fn trimmed(&self) -> Self {
        Self {
            username: self.username.trim().to_string(),
            credential: self.credential.trim().to_string(),
            host: self.host.trim().to_string(),
            port: self.port,
            node_count: self.node_count,
        }
    }

    /// Field-level checks that do not depend on the address policy
    pub fn validate(&self) -> Result<(), RigError> {
        if self.username.trim().is_empty() {
            return Err(RigError::InvalidConfiguration(
                "username must not be blank".to_string(),
            ));
        }
        if self.credential.trim().is_empty() {
            return Err(RigError::InvalidConfiguration(
                "credential must not be blank".to_string(),
            ));
        }
        let host = self.host.trim();
        if host.is_empty() {
            return Err(RigError::InvalidConfiguration(
                "host must not be blank".to_string(),
            ));
        }
        if host.chars().any(char::is_whitespace) {
            return Err(RigError::InvalidConfiguration(format!(
                "host '{}' contains whitespace",
                host
            )));
        }
        if self.port == 0 {
            return Err(RigError::InvalidConfiguration(
                "port must be within 1-65535".to_string(),
            ));
        }
        if self.node_count < 1 {
            return Err(RigError::InvalidConfiguration(
                "node count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for ClusterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterConfig")
            .field("username", &self.username)
            .field("credential", &"<redacted>")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("node_count", &self.node_count)
            .finish()
    }
}
