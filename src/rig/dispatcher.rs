//! Command dispatcher
//!
//! Fans one `RigCommand` out to every node session concurrently and folds the
//! per-node outcomes into a single `CommandResult`. Nothing is rolled back and nothing
//! is retried: remote effects that already happened on some nodes stay in place.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::commands::{CommandTemplates, RigCommand};
use super::error::RigError;
use super::manager::ConnectionManager;
use super::session::NodeSession;
use super::transport::TransportError;

/// Default per-node command timeout
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NodeOutcome {
    Success { output: String },
    Failure { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeResult {
    pub index: usize,
    pub host: String,
    pub outcome: NodeOutcome,
}

impl NodeResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, NodeOutcome::Success { .. })
    }
}

/// Aggregated outcome of one dispatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResult {
    pub command: RigCommand,
    /// Ordered by node index
    pub nodes: Vec<NodeResult>,
    /// True only if every node succeeded
    pub success: bool,
}

impl CommandResult {
    fn from_nodes(command: RigCommand, mut nodes: Vec<NodeResult>) -> Self {
        nodes.sort_by_key(|n| n.index);
        let success = !nodes.is_empty() && nodes.iter().all(NodeResult::is_success);
        Self {
            command,
            nodes,
            success,
        }
    }

    pub fn failed_nodes(&self) -> Vec<usize> {
        self.nodes
            .iter()
            .filter(|n| !n.is_success())
            .map(|n| n.index)
            .collect()
    }

    /// Failures as `CommandExecutionFailure` errors, one per failing node
    pub fn errors(&self) -> Vec<RigError> {
        self.nodes
            .iter()
            .filter_map(|n| match &n.outcome {
                NodeOutcome::Failure { reason } => Some(RigError::CommandExecutionFailure {
                    node: n.index,
                    reason: reason.clone(),
                }),
                NodeOutcome::Success { .. } => None,
            })
            .collect()
    }
}

/// Executes administrative commands on every node of a connected rig
pub struct CommandDispatcher {
    manager: Arc<ConnectionManager>,
    templates: CommandTemplates,
    timeout: Duration,
}

impl CommandDispatcher {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self {
            manager,
            templates: CommandTemplates::default(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_templates(mut self, templates: CommandTemplates) -> Self {
        self.templates = templates;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Run `command` on every node
    ///
    /// Fails with `NotConnected` before any I/O unless the rig is Connected. Per-node
    /// failures are reported inside the returned `CommandResult`.
    pub async fn execute(&self, command: RigCommand) -> Result<CommandResult, RigError> {
        let guard = self.manager.lock_connected().await?;
        info!(
            "Dispatching {} to {} nodes",
            command,
            guard.sessions().len()
        );

        let config = guard.config();
        let token = guard.token();
        let runs = guard.sessions().iter().map(|session| async move {
            let node = session.address();
            let outcome = match self.templates.render(command, node, config) {
                None => NodeOutcome::Failure {
                    reason: format!("no script template for {}", command),
                },
                Some(script) => tokio::select! {
                    biased;
                    _ = token.cancelled() => NodeOutcome::Failure {
                        reason: "interrupted by rig disconnect".to_string(),
                    },
                    r = tokio::time::timeout(self.timeout, session.exec(&script)) => {
                        match r {
                            Ok(result) => outcome_of(command, result),
                            Err(_) => NodeOutcome::Failure {
                                reason: format!("timed out after {}s", self.timeout.as_secs()),
                            },
                        }
                    }
                },
            };
            if let NodeOutcome::Failure { reason } = &outcome {
                warn!("{} failed on node {}: {}", command, node, reason);
            } else {
                debug!("{} succeeded on node {}", command, node);
            }
            NodeResult {
                index: node.index,
                host: node.host.clone(),
                outcome,
            }
        });
        let results = join_all(runs).await;

        let lost = guard
            .sessions()
            .iter()
            .any(|s| !s.is_open() && !command.drops_session());
        if lost {
            warn!("Node session lost during {}, tearing down rig connection", command);
            guard.teardown("node session lost during dispatch").await;
        }

        let result = CommandResult::from_nodes(command, results);
        info!(
            "{} finished: success={} failed_nodes={:?}",
            command,
            result.success,
            result.failed_nodes()
        );
        Ok(result)
    }

    pub async fn set_refresh(&self) -> Result<CommandResult, RigError> {
        self.execute(RigCommand::SetRefresh).await
    }

    pub async fn reset_refresh(&self) -> Result<CommandResult, RigError> {
        self.execute(RigCommand::ResetRefresh).await
    }

    pub async fn clear_staged_content(&self) -> Result<CommandResult, RigError> {
        self.execute(RigCommand::ClearStagedContent).await
    }

    pub async fn relaunch(&self) -> Result<CommandResult, RigError> {
        self.execute(RigCommand::Relaunch).await
    }

    pub async fn restart(&self) -> Result<CommandResult, RigError> {
        self.execute(RigCommand::Restart).await
    }

    pub async fn shutdown(&self) -> Result<CommandResult, RigError> {
        self.execute(RigCommand::Shutdown).await
    }

    /// Sessions this dispatcher would target, for diagnostics
    pub async fn targets(&self) -> Result<Vec<String>, RigError> {
        let guard = self.manager.lock_connected().await?;
        Ok(guard
            .sessions()
            .iter()
            .map(NodeSession::address)
            .map(ToString::to_string)
            .collect())
    }
}

fn outcome_of(
    command: RigCommand,
    result: Result<super::transport::ExecOutput, TransportError>,
) -> NodeOutcome {
    match result {
        Ok(output) if output.is_success() => NodeOutcome::Success {
            output: output.stdout.trim().to_string(),
        },
        Ok(output) => {
            let status = output
                .exit_status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            let stderr = output.stderr.trim();
            NodeOutcome::Failure {
                reason: if stderr.is_empty() {
                    format!("exit status {}", status)
                } else {
                    format!("exit status {}: {}", status, stderr)
                },
            }
        }
        Err(TransportError::Disconnected) if command.drops_session() => NodeOutcome::Success {
            output: String::new(),
        },
        Err(e) => NodeOutcome::Failure {
            reason: e.to_string(),
        },
    }
}
