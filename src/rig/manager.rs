//! Cluster connection manager
//!
//! # Architecture
//!
//! ```text
//! configure() ──► config (last known valid)
//!                     │
//! connect() ──────────┼──► lifecycle lock ──► open N sessions in parallel
//! disconnect() ──┐    │         │                    │
//! network lost ──┴──► epoch ────┘            all open? publish Connected
//!                  (generation + cancel)     else close all, fail closed
//! ```
//!
//! # Concurrency
//!
//! - `lifecycle` (async mutex) guards the session set. `connect`, `disconnect`,
//!   forced teardowns and command dispatch all run inside it.
//! - `epoch` is bumped *before* the lifecycle lock is taken by anything that must win
//!   over in-flight work (disconnect, network loss, a replaced configuration). The
//!   bump cancels the epoch token, so an in-flight connect stops opening sessions and
//!   closes what it already has.
//! - `connected` is an atomic projection, published and retracted under the epoch
//!   lock together with the generation check, so a superseded connect can never
//!   publish Connected after a disconnect has begun.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::ClusterConfig;
use super::error::{NodeFailure, RigError};
use super::session::{NodeSession, NodeSessionState};
use super::topology::{build_topology, AddressPolicy, NodeAddress, NumberedSuffix};
use super::transport::{SessionTransport, TransportError, TransportSession};

/// Default per-node connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Health poll and session liveness interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Quiet period before a scheduled connect fires
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// Aggregate connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Reported to callers of a failed attempt, never stored
    Failed,
}

#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub connect_timeout: Duration,
    pub poll_interval: Duration,
    pub debounce: Duration,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            debounce: DEFAULT_DEBOUNCE,
        }
    }
}

struct Epoch {
    generation: u64,
    token: CancellationToken,
}

#[derive(Default)]
struct Lifecycle {
    sessions: Vec<NodeSession>,
    /// Config the current session set was opened with
    active: Option<ClusterConfig>,
    /// Epoch the current session set belongs to
    generation: u64,
}

/// Owns the rig configuration and every node session
pub struct ConnectionManager {
    transport: Arc<dyn SessionTransport>,
    policy: Box<dyn AddressPolicy>,
    settings: ManagerSettings,
    config: RwLock<Option<ClusterConfig>>,
    epoch: Mutex<Epoch>,
    lifecycle: tokio::sync::Mutex<Lifecycle>,
    connected: AtomicBool,
    network_online: AtomicBool,
    state_tx: watch::Sender<ConnectionState>,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn SessionTransport>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            transport,
            policy: Box::new(NumberedSuffix),
            settings: ManagerSettings::default(),
            config: RwLock::new(None),
            epoch: Mutex::new(Epoch {
                generation: 0,
                token: CancellationToken::new(),
            }),
            lifecycle: tokio::sync::Mutex::new(Lifecycle::default()),
            connected: AtomicBool::new(false),
            network_online: AtomicBool::new(true),
            state_tx,
        }
    }

    pub fn with_policy(mut self, policy: Box<dyn AddressPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_settings(mut self, settings: ManagerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    // ========================================================================
    // Read-only projections
    // ========================================================================

    /// Whether every node session is open. Never blocks.
    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Receive every aggregate state change
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Last known valid configuration
    pub fn config(&self) -> Option<ClusterConfig> {
        self.config.read().clone()
    }

    pub fn is_network_online(&self) -> bool {
        self.network_online.load(Ordering::SeqCst)
    }

    /// Node addresses of the configured rig
    pub fn topology(&self) -> Result<Vec<NodeAddress>, RigError> {
        let config = self.config().ok_or_else(no_config)?;
        build_topology(&config, self.policy.as_ref())
    }

    /// Index of the node at `host:port`, for diagnostics
    pub fn node_index_of(&self, host: &str, port: u16) -> Option<usize> {
        let config = self.config()?;
        self.policy
            .index_of(&config.host, config.port, host, port)
            .filter(|index| *index < config.node_count)
    }

    /// Number of sessions currently open. Waits for in-flight lifecycle operations.
    pub async fn open_session_count(&self) -> usize {
        let lifecycle = self.lifecycle.lock().await;
        lifecycle.sessions.iter().filter(|s| s.is_open()).count()
    }

    /// Per-node session state for the configured topology
    pub async fn node_states(&self) -> Vec<(NodeAddress, NodeSessionState)> {
        let Ok(topology) = self.topology() else {
            return Vec::new();
        };
        let lifecycle = self.lifecycle.lock().await;
        topology
            .into_iter()
            .map(|node| {
                let state = lifecycle
                    .sessions
                    .iter()
                    .find(|s| s.address() == &node)
                    .map(NodeSession::state)
                    .unwrap_or(NodeSessionState::Unopened);
                (node, state)
            })
            .collect()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Validate and store a configuration. Performs no I/O.
    ///
    /// A configuration different from the current one supersedes any in-flight
    /// attempt and retracts Connected; the old session set is drained by the next
    /// lifecycle operation.
    pub fn configure(&self, config: ClusterConfig) -> Result<(), RigError> {
        let config = config.trimmed();
        build_topology(&config, self.policy.as_ref())?;

        {
            let mut current = self.config.write();
            if current.as_ref() == Some(&config) {
                debug!("Configuration unchanged, nothing to do");
                return Ok(());
            }
            info!(
                "Rig configured: {}@{}:{} ({} nodes)",
                config.username, config.host, config.port, config.node_count
            );
            *current = Some(config);
        }

        self.supersede("configuration replaced");
        Ok(())
    }

    /// Open a session to every node
    ///
    /// Returns `Ok(true)` once every node is open. Any node failure closes every
    /// session this attempt opened and returns `PartialClusterUnreachable`.
    pub async fn connect(self: &Arc<Self>) -> Result<bool, RigError> {
        let (generation, token) = self.current_epoch();
        self.connect_in_epoch(generation, token).await
    }

    /// `configure` followed by `connect`
    pub async fn connect_with(self: &Arc<Self>, config: ClusterConfig) -> Result<bool, RigError> {
        self.configure(config)?;
        self.connect().await
    }

    /// Configure now, connect after the debounce window
    ///
    /// Any configure/disconnect during the window supersedes this request, which then
    /// resolves to `Err(Superseded)` without touching the network.
    pub fn schedule_connect(
        self: &Arc<Self>,
        config: ClusterConfig,
    ) -> Result<JoinHandle<Result<bool, RigError>>, RigError> {
        self.configure(config)?;
        let (generation, token) = self.current_epoch();
        let manager = Arc::clone(self);
        let debounce = self.settings.debounce;

        Ok(tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!("Scheduled connect superseded during debounce");
                    return Err(RigError::Superseded);
                }
                _ = tokio::time::sleep(debounce) => {}
            }
            manager.connect_in_epoch(generation, token).await
        }))
    }

    async fn connect_in_epoch(
        self: &Arc<Self>,
        generation: u64,
        token: CancellationToken,
    ) -> Result<bool, RigError> {
        // Read after the epoch: a network loss flips this before bumping the epoch
        if !self.is_network_online() {
            warn!("Connect requested while network is unavailable");
            return Err(RigError::NetworkUnavailable);
        }
        let config = self.config().ok_or_else(no_config)?;

        let mut lifecycle = self.lifecycle.lock().await;

        if token.is_cancelled() {
            debug!("Connect attempt (epoch {}) superseded before start", generation);
            return Err(RigError::Superseded);
        }

        if self.connected()
            && lifecycle.generation == generation
            && lifecycle.active.as_ref() == Some(&config)
        {
            debug!("Already connected to {}, reusing session set", config.host);
            return Ok(true);
        }

        // Drain before replace
        self.teardown_locked(&mut lifecycle).await;
        if token.is_cancelled() {
            debug!("Connect attempt (epoch {}) superseded during drain", generation);
            return Err(RigError::Superseded);
        }

        let topology = build_topology(&config, self.policy.as_ref())?;
        if !self.publish_state(generation, ConnectionState::Connecting) {
            return Err(RigError::Superseded);
        }
        info!(
            "Connecting to rig {}@{}:{} ({} nodes)",
            config.username, config.host, config.port, config.node_count
        );

        let opened = self.open_all(&topology, &config, &token).await;

        let mut sessions = Vec::with_capacity(opened.len());
        let mut failures = Vec::new();
        for (node, result) in opened {
            match result {
                Ok(session) => sessions.push(NodeSession::new(node, session)),
                Err(e) => {
                    warn!("Node {} failed to open: {}", node, e);
                    failures.push(NodeFailure {
                        index: node.index,
                        host: node.host,
                        cause: e.into(),
                    });
                }
            }
        }

        if token.is_cancelled() {
            info!("Connect attempt superseded, closing {} opened sessions", sessions.len());
            close_all(&sessions).await;
            self.settle_failed(generation);
            return Err(RigError::Superseded);
        }

        if !failures.is_empty() {
            warn!(
                "Rig connect failed on {} of {} nodes, closing {} opened sessions",
                failures.len(),
                topology.len(),
                sessions.len()
            );
            close_all(&sessions).await;
            self.settle_failed(generation);
            return Err(RigError::PartialClusterUnreachable { failures });
        }

        if !self.publish_connected(generation) {
            info!("Connect attempt lost the race with a teardown, closing sessions");
            close_all(&sessions).await;
            return Err(RigError::Superseded);
        }

        info!("Rig connected: {} node sessions open", sessions.len());
        self.spawn_session_monitor(generation, sessions.clone());
        lifecycle.sessions = sessions;
        lifecycle.active = Some(config);
        lifecycle.generation = generation;
        Ok(true)
    }

    /// `connect` collapsed to a flag, errors logged
    pub async fn connect_flag(self: &Arc<Self>) -> bool {
        match self.connect().await {
            Ok(connected) => connected,
            Err(e) => {
                warn!("Rig connect failed: {}", e);
                false
            }
        }
    }

    /// Close every node session. Idempotent, never fails.
    pub async fn disconnect(&self) {
        self.supersede("disconnect requested");
        let mut lifecycle = self.lifecycle.lock().await;
        self.teardown_locked(&mut lifecycle).await;
    }

    /// Network came back: reconnect with the last known configuration
    ///
    /// Returns None when there is nothing to do (no configuration or already
    /// connected).
    pub async fn on_network_available(self: &Arc<Self>) -> Option<Result<bool, RigError>> {
        self.network_online.store(true, Ordering::SeqCst);
        if self.config().is_none() {
            debug!("Network available, no rig configured");
            return None;
        }
        if self.connected() {
            debug!("Network available, rig already connected");
            return None;
        }
        info!("Network available, reconnecting rig");
        Some(self.connect().await)
    }

    /// Network went away: tear everything down now
    pub async fn on_network_lost(&self) {
        self.network_online.store(false, Ordering::SeqCst);
        info!("Network lost, forcing rig disconnect");
        self.supersede("network lost");
        let mut lifecycle = self.lifecycle.lock().await;
        self.teardown_locked(&mut lifecycle).await;
    }

    /// Teardown after a session of `generation` was found dead
    async fn on_session_failure(&self, generation: u64) {
        {
            let epoch = self.epoch.lock();
            if epoch.generation != generation {
                return;
            }
        }
        self.supersede("node session failed");
        let mut lifecycle = self.lifecycle.lock().await;
        self.teardown_locked(&mut lifecycle).await;
    }

    // ========================================================================
    // Dispatch access
    // ========================================================================

    /// Lock the lifecycle for a command, failing fast unless Connected
    pub(crate) async fn lock_connected(&self) -> Result<ConnectedGuard<'_>, RigError> {
        if !self.connected() {
            return Err(RigError::NotConnected);
        }
        let (generation, token) = self.current_epoch();
        let lifecycle = self.lifecycle.lock().await;

        let config = match &lifecycle.active {
            Some(config)
                if self.connected()
                    && lifecycle.generation == generation
                    && !lifecycle.sessions.is_empty() =>
            {
                config.clone()
            }
            _ => return Err(RigError::NotConnected),
        };

        Ok(ConnectedGuard {
            manager: self,
            lifecycle,
            config,
            generation,
            token,
        })
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn current_epoch(&self) -> (u64, CancellationToken) {
        let epoch = self.epoch.lock();
        (epoch.generation, epoch.token.clone())
    }

    /// Start a new epoch: cancel in-flight work and retract Connected
    fn supersede(&self, reason: &str) {
        let mut epoch = self.epoch.lock();
        epoch.generation += 1;
        epoch.token.cancel();
        epoch.token = CancellationToken::new();
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        self.set_state(ConnectionState::Disconnected);
        debug!(
            "Epoch {} started ({}), was_connected={}",
            epoch.generation, reason, was_connected
        );
    }

    /// Publish `state` only while `generation` is still current
    fn publish_state(&self, generation: u64, state: ConnectionState) -> bool {
        let epoch = self.epoch.lock();
        if epoch.generation != generation {
            return false;
        }
        if state == ConnectionState::Connected {
            self.connected.store(true, Ordering::SeqCst);
        }
        self.set_state(state);
        true
    }

    fn publish_connected(&self, generation: u64) -> bool {
        self.publish_state(generation, ConnectionState::Connected)
    }

    fn settle_failed(&self, generation: u64) {
        self.publish_state(generation, ConnectionState::Disconnected);
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    async fn open_all(
        &self,
        topology: &[NodeAddress],
        config: &ClusterConfig,
        token: &CancellationToken,
    ) -> Vec<(NodeAddress, Result<Box<dyn TransportSession>, TransportError>)> {
        let timeout = self.settings.connect_timeout;
        let opens = topology.iter().map(|node| async move {
            debug!("Opening session to node {}", node);
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => Err(TransportError::Connect("attempt cancelled".to_string())),
                r = tokio::time::timeout(timeout, self.transport.open(node, config)) => {
                    r.unwrap_or(Err(TransportError::Timeout))
                }
            };
            (node.clone(), result)
        });
        join_all(opens).await
    }

    async fn teardown_locked(&self, lifecycle: &mut Lifecycle) {
        if lifecycle.sessions.is_empty() {
            lifecycle.active = None;
            return;
        }
        info!("Closing {} node sessions", lifecycle.sessions.len());
        let sessions = std::mem::take(&mut lifecycle.sessions);
        lifecycle.active = None;
        close_all(&sessions).await;
        info!("Rig disconnected");
    }

    /// Watch session liveness for the lifetime of `generation`
    fn spawn_session_monitor(self: &Arc<Self>, generation: u64, sessions: Vec<NodeSession>) {
        let manager: Weak<Self> = Arc::downgrade(self);
        let period = self.settings.poll_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                if manager.current_epoch().0 != generation {
                    break;
                }
                if let Some(dead) = sessions.iter().find(|s| !s.is_open()) {
                    warn!("Node session {} lost, tearing down rig connection", dead.address());
                    dead.mark_errored();
                    manager.on_session_failure(generation).await;
                    break;
                }
            }
            debug!("Session monitor for epoch {} stopped", generation);
        });
    }
}

/// Lifecycle lock held by a command dispatch
pub(crate) struct ConnectedGuard<'a> {
    manager: &'a ConnectionManager,
    lifecycle: MutexGuard<'a, Lifecycle>,
    config: ClusterConfig,
    generation: u64,
    token: CancellationToken,
}

impl ConnectedGuard<'_> {
    pub(crate) fn sessions(&self) -> &[NodeSession] {
        &self.lifecycle.sessions
    }

    pub(crate) fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Cancelled when a teardown wants the lock
    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Tear down after a session died mid-dispatch
    pub(crate) async fn teardown(mut self, reason: &str) {
        {
            let epoch = self.manager.epoch.lock();
            if epoch.generation != self.generation {
                return;
            }
        }
        self.manager.supersede(reason);
        self.manager.teardown_locked(&mut self.lifecycle).await;
    }
}

async fn close_all(sessions: &[NodeSession]) {
    join_all(sessions.iter().map(|s| s.close())).await;
}

fn no_config() -> RigError {
    RigError::InvalidConfiguration("no rig configured".to_string())
}
