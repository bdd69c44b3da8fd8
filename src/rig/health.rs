//! Connection health poller
//!
//! Samples `ConnectionManager::connected()` on a fixed-rate timer and hands a
//! `HealthSnapshot` to a sink on every tick. Skipped ticks are not caught up.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::manager::ConnectionManager;

/// Read-only projection of the connection state at one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub connected: bool,
    pub observed_at: DateTime<Utc>,
}

impl HealthSnapshot {
    pub fn now(connected: bool) -> Self {
        Self {
            connected,
            observed_at: Utc::now(),
        }
    }
}

/// Receives a snapshot on every poll tick
#[async_trait]
pub trait HealthSink: Send + Sync {
    async fn record(&self, snapshot: HealthSnapshot);
}

#[async_trait]
impl<F> HealthSink for F
where
    F: Fn(HealthSnapshot) + Send + Sync,
{
    async fn record(&self, snapshot: HealthSnapshot) {
        self(snapshot)
    }
}

#[async_trait]
impl HealthSink for watch::Sender<Option<HealthSnapshot>> {
    async fn record(&self, snapshot: HealthSnapshot) {
        self.send_replace(Some(snapshot));
    }
}

/// Handle to a running poller
pub struct HealthPoller {
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl HealthPoller {
    /// Start polling `manager` every `interval`
    pub fn spawn(
        manager: Arc<ConnectionManager>,
        sink: Arc<dyn HealthSink>,
        interval: Duration,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let stop = shutdown.clone();

        let task = tokio::spawn(async move {
            info!("Health poller started (interval={}ms)", interval.as_millis());
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        let snapshot = HealthSnapshot::now(manager.connected());
                        debug!("Health tick: connected={}", snapshot.connected);
                        sink.record(snapshot).await;
                    }
                }
            }
            info!("Health poller stopped");
        });

        Self {
            shutdown,
            task: Some(task),
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the timer and wait for the task to exit
    pub async fn shutdown(&mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Health poller task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for HealthPoller {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
