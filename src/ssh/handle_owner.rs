//! Handle Owner Task
//!
//! Only one task owns the `Handle<ClientHandler>`. Node sessions talk to it via
//! `HandleController`, which sends commands through an mpsc channel. This keeps
//! the handle out of `Arc<Mutex<..>>` and lets concurrent exec calls on the same
//! node open their channels without holding a lock across `.await`.
//!
//! ```ignore
//! let controller = spawn_handle_owner_task(handle, "lg1".into());
//! let channel = controller.open_session_channel().await?;
//! ```

use std::time::Duration;

use russh::client::{Handle, Msg};
use russh::Channel;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::client::ClientHandler;
use super::error::SshError;

/// How often the owner checks whether the server side went away
const LIVENESS_CHECK_INTERVAL: Duration = Duration::from_millis(500);

/// Commands sent to the Handle Owner Task
pub enum HandleCommand {
    /// Open a session channel (for exec)
    ChannelOpenSession {
        reply_tx: oneshot::Sender<Result<Channel<Msg>, russh::Error>>,
    },

    /// Disconnect the SSH connection
    Disconnect,
}

/// Controller for sending commands to the Handle Owner Task
///
/// Cloning only copies the sender. Any holder can open channels or disconnect.
#[derive(Clone)]
pub struct HandleController {
    cmd_tx: mpsc::Sender<HandleCommand>,
}

impl HandleController {
    /// Wrap a raw command sender. Used by tests; production code goes through
    /// `spawn_handle_owner_task`.
    pub fn new(cmd_tx: mpsc::Sender<HandleCommand>) -> Self {
        Self { cmd_tx }
    }

    /// Open a session channel
    pub async fn open_session_channel(&self) -> Result<Channel<Msg>, SshError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(HandleCommand::ChannelOpenSession { reply_tx })
            .await
            .map_err(|_| SshError::Disconnected)?;
        reply_rx
            .await
            .map_err(|_| SshError::Disconnected)?
            .map_err(|e| match e {
                russh::Error::Disconnect => SshError::Disconnected,
                other => SshError::ChannelError(other.to_string()),
            })
    }

    /// Disconnect the SSH connection
    pub async fn disconnect(&self) {
        let _ = self.cmd_tx.send(HandleCommand::Disconnect).await;
    }

    /// Check if the Handle Owner Task is still running
    pub fn is_connected(&self) -> bool {
        !self.cmd_tx.is_closed()
    }
}

/// Spawn the Handle Owner Task
///
/// Consumes the handle. The task exits on `Disconnect`, when every controller is
/// dropped, or when the underlying connection closes.
pub fn spawn_handle_owner_task(handle: Handle<ClientHandler>, label: String) -> HandleController {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<HandleCommand>(64);

    tokio::spawn(async move {
        let mut liveness = tokio::time::interval(LIVENESS_CHECK_INTERVAL);
        liveness.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Handle owner task started for {}", label);

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(HandleCommand::ChannelOpenSession { reply_tx }) => {
                        let result = handle.channel_open_session().await;
                        if reply_tx.send(result).is_err() {
                            warn!("Caller dropped before receiving channel_open_session result");
                        }
                    }
                    Some(HandleCommand::Disconnect) => {
                        info!("Disconnect requested for {}", label);
                        break;
                    }
                    None => {
                        info!("All controllers dropped for {}", label);
                        break;
                    }
                },
                _ = liveness.tick() => {
                    if handle.is_closed() {
                        warn!("Connection to {} closed by remote", label);
                        break;
                    }
                }
            }
        }

        drain_pending_commands(&mut cmd_rx);

        if !handle.is_closed() {
            let _ = handle
                .disconnect(russh::Disconnect::ByApplication, "Session closed", "en")
                .await;
        }
        debug!("Handle owner task terminated for {}", label);
    });

    HandleController { cmd_tx }
}

/// Drain all pending commands, returning Disconnect to each waiting caller
fn drain_pending_commands(cmd_rx: &mut mpsc::Receiver<HandleCommand>) {
    cmd_rx.close();

    while let Ok(cmd) = cmd_rx.try_recv() {
        match cmd {
            HandleCommand::ChannelOpenSession { reply_tx } => {
                let _ = reply_tx.send(Err(russh::Error::Disconnect));
            }
            HandleCommand::Disconnect => {}
        }
    }
}
