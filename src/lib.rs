//! rigctl - connection and command dispatch for multi-screen display rigs
//!
//! A rig is a primary node plus N-1 secondaries that render one synchronized
//! visualization. `rig::ConnectionManager` owns one SSH session per node,
//! `rig::CommandDispatcher` fans control commands out to all of them, and
//! `rig::HealthPoller` / `rig::NetworkBridge` keep the connection state observable
//! and in step with the network.

pub mod config;
pub mod rig;
pub mod ssh;

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use config::{RigSettings, SettingsStorage, StatusFile};
pub use rig::{
    ClusterConfig, CommandDispatcher, CommandResult, ConnectionManager, ConnectionState,
    RigCommand, RigError,
};
pub use ssh::SshTransport;

/// Initialize logging
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build a manager and dispatcher wired to the SSH transport from `settings`
///
/// The cluster in `settings`, if any, is configured but not connected.
pub fn build_rig(
    settings: &RigSettings,
) -> Result<(Arc<ConnectionManager>, CommandDispatcher), RigError> {
    let transport = Arc::new(SshTransport::new(settings.ssh.clone()));
    let manager = Arc::new(
        ConnectionManager::new(transport)
            .with_policy(settings.address_policy.build())
            .with_settings(settings.manager_settings()),
    );

    if let Some(cluster) = &settings.cluster {
        manager.configure(cluster.clone())?;
    }

    let dispatcher = CommandDispatcher::new(Arc::clone(&manager))
        .with_templates(settings.templates.clone())
        .with_timeout(settings.command_timeout());

    Ok((manager, dispatcher))
}
