//! Network signal bridge
//!
//! Forwards availability events from an external watcher into the connection
//! manager. A loss is handled inline so it is never queued behind a reconnect; a
//! reconnect runs on its own task and is superseded by any later loss.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::manager::ConnectionManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkSignal {
    Available,
    Lost,
}

/// Running bridge between a network watcher and a manager
pub struct NetworkBridge {
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl NetworkBridge {
    /// Create a signal channel and start bridging it into `manager`
    pub fn channel(manager: Arc<ConnectionManager>) -> (mpsc::Sender<NetworkSignal>, Self) {
        let (tx, rx) = mpsc::channel(16);
        (tx, Self::spawn(manager, rx))
    }

    pub fn spawn(manager: Arc<ConnectionManager>, mut signals: mpsc::Receiver<NetworkSignal>) -> Self {
        let shutdown = CancellationToken::new();
        let stop = shutdown.clone();

        let task = tokio::spawn(async move {
            info!("Network bridge started");
            let mut reconnect: Option<JoinHandle<()>> = None;

            loop {
                let signal = tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    signal = signals.recv() => match signal {
                        Some(signal) => signal,
                        None => {
                            debug!("Network watcher closed its channel");
                            break;
                        }
                    },
                };

                match signal {
                    NetworkSignal::Lost => {
                        manager.on_network_lost().await;
                    }
                    NetworkSignal::Available => {
                        if reconnect.as_ref().is_some_and(|t| !t.is_finished()) {
                            debug!("Reconnect already in progress");
                            continue;
                        }
                        let manager = Arc::clone(&manager);
                        reconnect = Some(tokio::spawn(async move {
                            match manager.on_network_available().await {
                                Some(Ok(_)) => info!("Rig reconnected after network recovery"),
                                Some(Err(e)) => warn!("Rig reconnect failed: {}", e),
                                None => {}
                            }
                        }));
                    }
                }
            }

            // An in-flight reconnect finishes on its own; disconnect() supersedes it
            drop(reconnect);
            info!("Network bridge stopped");
        });

        Self {
            shutdown,
            task: Some(task),
        }
    }

    /// Stop bridging and wait for the task to exit
    pub async fn shutdown(&mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Network bridge task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for NetworkBridge {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
