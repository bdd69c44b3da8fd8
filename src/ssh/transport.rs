//! SSH implementation of the rig session transport

use async_trait::async_trait;
use russh::ChannelMsg;
use tracing::{debug, info};

use crate::rig::{
    ClusterConfig, ExecOutput, NodeAddress, SessionTransport, TransportError, TransportSession,
};

use super::client::SshClient;
use super::config::{SshConfig, SshOptions};
use super::error::SshError;
use super::handle_owner::{spawn_handle_owner_task, HandleController};

/// Opens one password-authenticated SSH connection per node
#[derive(Debug, Clone, Default)]
pub struct SshTransport {
    options: SshOptions,
}

impl SshTransport {
    pub fn new(options: SshOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &SshOptions {
        &self.options
    }
}

#[async_trait]
impl SessionTransport for SshTransport {
    async fn open(
        &self,
        node: &NodeAddress,
        config: &ClusterConfig,
    ) -> Result<Box<dyn TransportSession>, TransportError> {
        let ssh_config = SshConfig::for_node(node, config, &self.options);
        let handle = SshClient::new(ssh_config).connect().await?;
        let controller = spawn_handle_owner_task(handle, node.to_string());

        info!("Node session {} open", node);
        Ok(Box::new(SshNodeSession {
            label: node.to_string(),
            controller,
        }))
    }
}

/// One node's SSH connection; each exec runs on a fresh channel
pub struct SshNodeSession {
    label: String,
    controller: HandleController,
}

impl SshNodeSession {
    async fn run(&self, script: &str) -> Result<ExecOutput, SshError> {
        let mut channel = self.controller.open_session_channel().await?;
        channel.exec(true, script).await?;

        let mut output = ExecOutput::default();
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, ext } if ext == 1 => {
                    stderr.extend_from_slice(data)
                }
                ChannelMsg::ExitStatus { exit_status } => output.exit_status = Some(exit_status),
                ChannelMsg::Close => break,
                _ => {}
            }
        }

        output.stdout = String::from_utf8_lossy(&stdout).into_owned();
        output.stderr = String::from_utf8_lossy(&stderr).into_owned();

        if output.exit_status.is_none() && !self.controller.is_connected() {
            return Err(SshError::Disconnected);
        }

        debug!(
            "Exec on {} finished with status {:?}",
            self.label, output.exit_status
        );
        Ok(output)
    }
}

#[async_trait]
impl TransportSession for SshNodeSession {
    async fn exec(&self, script: &str) -> Result<ExecOutput, TransportError> {
        self.run(script).await.map_err(TransportError::from)
    }

    async fn close(&self) {
        if self.controller.is_connected() {
            debug!("Closing SSH session {}", self.label);
            self.controller.disconnect().await;
        }
    }

    fn is_alive(&self) -> bool {
        self.controller.is_connected()
    }
}
