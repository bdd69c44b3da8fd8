//! Node sessions owned by the connection manager

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;

use super::topology::NodeAddress;
use super::transport::{ExecOutput, TransportError, TransportSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeSessionState {
    Unopened,
    Open,
    Closed,
    Errored,
}

/// One node's transport session plus its lifecycle state
///
/// Cloning shares the underlying session; only the manager hands out clones and only
/// to the dispatcher and the session monitor.
#[derive(Clone)]
pub struct NodeSession {
    address: NodeAddress,
    inner: Arc<dyn TransportSession>,
    state: Arc<RwLock<NodeSessionState>>,
}

impl NodeSession {
    pub(crate) fn new(address: NodeAddress, inner: Box<dyn TransportSession>) -> Self {
        Self {
            address,
            inner: Arc::from(inner),
            state: Arc::new(RwLock::new(NodeSessionState::Open)),
        }
    }

    pub fn address(&self) -> &NodeAddress {
        &self.address
    }

    pub fn index(&self) -> usize {
        self.address.index
    }

    pub fn state(&self) -> NodeSessionState {
        *self.state.read()
    }

    /// Open and the transport still reports the channel alive
    pub fn is_open(&self) -> bool {
        self.state() == NodeSessionState::Open && self.inner.is_alive()
    }

    pub(crate) async fn exec(&self, script: &str) -> Result<ExecOutput, TransportError> {
        if self.state() != NodeSessionState::Open {
            return Err(TransportError::Disconnected);
        }
        let result = self.inner.exec(script).await;
        if let Err(e) = &result {
            if e.is_fatal() {
                self.mark_errored();
            }
        }
        result
    }

    pub(crate) fn mark_errored(&self) {
        let mut state = self.state.write();
        if *state == NodeSessionState::Open {
            debug!("Node session {} marked errored", self.address);
            *state = NodeSessionState::Errored;
        }
    }

    pub(crate) async fn close(&self) {
        {
            let mut state = self.state.write();
            if *state == NodeSessionState::Closed {
                return;
            }
            *state = NodeSessionState::Closed;
        }
        debug!("Closing node session {}", self.address);
        self.inner.close().await;
    }
}

impl std::fmt::Debug for NodeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeSession")
            .field("address", &self.address)
            .field("state", &self.state())
            .finish()
    }
}
