//! Rig module - cluster connection and command dispatch
//!
//! # Components
//! - `topology`: node addresses derived from the base host
//! - `transport`: the {open, exec, close} seam every protocol implements
//! - `manager`: configuration, aggregate state machine, node session set
//! - `dispatcher`: concurrent command fan-out with per-node results
//! - `health`: fixed-rate connection snapshots
//! - `network`: network availability events into the manager

mod commands;
mod config;
mod dispatcher;
mod error;
mod health;
mod manager;
mod network;
mod session;
mod topology;
mod transport;

pub use commands::{shell_quote, CommandTemplates, RigCommand};
pub use config::ClusterConfig;
pub use dispatcher::{
    CommandDispatcher, CommandResult, NodeOutcome, NodeResult, DEFAULT_COMMAND_TIMEOUT,
};
pub use error::{NodeFailure, NodeFailureCause, RigError};
pub use health::{HealthPoller, HealthSink, HealthSnapshot};
pub use manager::{
    ConnectionManager, ConnectionState, ManagerSettings, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_DEBOUNCE, DEFAULT_POLL_INTERVAL,
};
pub use network::{NetworkBridge, NetworkSignal};
pub use session::{NodeSession, NodeSessionState};
pub use topology::{
    build_topology, AddressPolicy, AddressPolicyKind, NodeAddress, NodeRole, NumberedSuffix,
    PortOffset,
};
pub use transport::{ExecOutput, SessionTransport, TransportError, TransportSession};
