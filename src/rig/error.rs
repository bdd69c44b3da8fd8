//! Rig error types

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Why a single node failed to join the cluster during `connect()`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeFailureCause {
    /// Credentials were rejected by the node
    Authentication { reason: String },
    /// The node did not answer within the connect timeout
    Timeout,
    /// Address resolution, TCP or handshake failure
    Unreachable { reason: String },
}

/// One failing node in a `PartialClusterUnreachable` error
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeFailure {
    pub index: usize,
    pub host: String,
    pub cause: NodeFailureCause,
}

impl fmt::Display for NodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cause {
            NodeFailureCause::Authentication { reason } => write!(
                f,
                "node {} ({}): authentication failed: {}",
                self.index, self.host, reason
            ),
            NodeFailureCause::Timeout => {
                write!(f, "node {} ({}): connection timed out", self.index, self.host)
            }
            NodeFailureCause::Unreachable { reason } => write!(
                f,
                "node {} ({}): unreachable: {}",
                self.index, self.host, reason
            ),
        }
    }
}

impl NodeFailure {
    /// Lift a single node failure into the matching per-node error kind
    pub fn to_error(&self) -> RigError {
        match &self.cause {
            NodeFailureCause::Authentication { reason } => RigError::AuthenticationFailure {
                node: self.index,
                reason: reason.clone(),
            },
            NodeFailureCause::Timeout => RigError::ConnectionTimeout { node: self.index },
            NodeFailureCause::Unreachable { reason } => RigError::NodeUnreachable {
                node: self.index,
                reason: reason.clone(),
            },
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RigError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Authentication failed on node {node}: {reason}")]
    AuthenticationFailure { node: usize, reason: String },

    #[error("Connection to node {node} timed out")]
    ConnectionTimeout { node: usize },

    #[error("Node {node} unreachable: {reason}")]
    NodeUnreachable { node: usize, reason: String },

    #[error("Cluster partially unreachable: {}", format_failures(.failures))]
    PartialClusterUnreachable { failures: Vec<NodeFailure> },

    #[error("Not connected to the rig")]
    NotConnected,

    #[error("Command failed on node {node}: {reason}")]
    CommandExecutionFailure { node: usize, reason: String },

    #[error("Connection attempt superseded by a newer request")]
    Superseded,

    #[error("Network unavailable")]
    NetworkUnavailable,
}

fn format_failures(failures: &[NodeFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl RigError {
    /// Indices of the nodes this error names, if any
    pub fn failed_nodes(&self) -> Vec<usize> {
        match self {
            RigError::AuthenticationFailure { node, .. }
            | RigError::ConnectionTimeout { node }
            | RigError::NodeUnreachable { node, .. }
            | RigError::CommandExecutionFailure { node, .. } => vec![*node],
            RigError::PartialClusterUnreachable { failures } => {
                failures.iter().map(|f| f.index).collect()
            }
            _ => Vec::new(),
        }
    }
}

impl Serialize for RigError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
