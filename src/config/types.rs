//! Settings file types

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::rig::{AddressPolicyKind, ClusterConfig, CommandTemplates, ManagerSettings};
use crate::ssh::SshOptions;

/// Current settings file version
pub const CONFIG_VERSION: u32 = 1;

/// Persisted rig settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RigSettings {
    /// Settings format version
    #[serde(default = "default_version")]
    pub version: u32,

    /// Rig to connect to; absent until the first `init`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<ClusterConfig>,

    /// Connect on startup when a cluster is configured
    #[serde(default)]
    pub auto_connect: bool,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_debounce")]
    pub debounce_ms: u64,

    #[serde(default)]
    pub address_policy: AddressPolicyKind,

    #[serde(default)]
    pub ssh: SshOptions,

    #[serde(default)]
    pub templates: CommandTemplates,
}

fn default_version() -> u32 {
    CONFIG_VERSION
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_command_timeout() -> u64 {
    30
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_debounce() -> u64 {
    300
}

impl Default for RigSettings {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            cluster: None,
            auto_connect: false,
            connect_timeout_secs: default_connect_timeout(),
            command_timeout_secs: default_command_timeout(),
            poll_interval_ms: default_poll_interval(),
            debounce_ms: default_debounce(),
            address_policy: AddressPolicyKind::default(),
            ssh: SshOptions::default(),
            templates: CommandTemplates::default(),
        }
    }
}

impl RigSettings {
    pub fn manager_settings(&self) -> ManagerSettings {
        ManagerSettings {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs.max(1)),
            poll_interval: self.poll_interval(),
            debounce: Duration::from_millis(self.debounce_ms),
        }
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs.max(1))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }

    /// Whether startup should connect without being asked
    pub fn should_auto_connect(&self) -> bool {
        self.auto_connect && self.cluster.is_some()
    }
}
