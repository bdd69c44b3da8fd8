//! Session transport seam
//!
//! The connection manager never talks to a protocol directly. It asks a
//! `SessionTransport` to open one authenticated command channel per node and then
//! drives the returned `TransportSession` through `exec` and `close`.
//! `crate::ssh::SshTransport` is the production implementation.

use async_trait::async_trait;
use thiserror::Error;

use super::config::ClusterConfig;
use super::error::NodeFailureCause;
use super::topology::NodeAddress;

/// Errors raised by a transport for a single node
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Authentication rejected: {0}")]
    Authentication(String),

    #[error("Timed out")]
    Timeout,

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Execution failed: {0}")]
    Exec(String),

    #[error("Session disconnected")]
    Disconnected,
}

impl TransportError {
    /// Whether the session this error came from is no longer usable
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransportError::Disconnected)
    }
}

impl From<TransportError> for NodeFailureCause {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Authentication(reason) => NodeFailureCause::Authentication { reason },
            TransportError::Timeout => NodeFailureCause::Timeout,
            other => NodeFailureCause::Unreachable {
                reason: other.to_string(),
            },
        }
    }
}

/// Output of one remote script
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_status: Option<u32>,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_status == Some(0)
    }
}

/// Opens authenticated sessions to nodes
#[async_trait]
pub trait SessionTransport: Send + Sync {
    async fn open(
        &self,
        node: &NodeAddress,
        config: &ClusterConfig,
    ) -> Result<Box<dyn TransportSession>, TransportError>;
}

/// One open command channel to one node
#[async_trait]
pub trait TransportSession: Send + Sync {
    /// Run `script` on the node and wait for it to finish
    async fn exec(&self, script: &str) -> Result<ExecOutput, TransportError>;

    /// Close the session. Must be safe to call more than once.
    async fn close(&self);

    /// Cheap liveness check, no I/O
    fn is_alive(&self) -> bool;
}
