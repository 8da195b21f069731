//! Published topology status.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// Role of the node in the mesh
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TopologyState {
    /// Looking for a root
    Scanning,
    /// This node is the root
    StandaloneRoot,
    /// Attached (or attaching) to a root
    ConnectedChild,
    /// Root talking to a competing root
    MergeNegotiation,
    /// Terminal: the node must be rebuilt
    RestartRequested {
        /// Why
        reason: String,
    },
}

impl fmt::Display for TopologyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopologyState::Scanning => f.write_str("scanning"),
            TopologyState::StandaloneRoot => f.write_str("root"),
            TopologyState::ConnectedChild => f.write_str("child"),
            TopologyState::MergeNegotiation => f.write_str("merging"),
            TopologyState::RestartRequested { reason } => write!(f, "restart ({})", reason),
        }
    }
}

/// Snapshot published to every reader
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopologyStatus {
    /// Current role
    pub state: TopologyState,
    /// Station is on a home network
    pub connected_to_home_wifi: bool,
    /// Station is attached to a root
    pub connected_to_root: bool,
    /// Stations attached to this node's access point
    pub connected_stations: usize,
    /// Token for the root's mesh WebSocket, from the login exchange
    #[serde(skip)]
    pub mesh_token: Option<String>,
}

impl Default for TopologyStatus {
    fn default() -> Self {
        Self {
            state: TopologyState::Scanning,
            connected_to_home_wifi: false,
            connected_to_root: false,
            connected_stations: 0,
            mesh_token: None,
        }
    }
}

/// Shared view of the topology status.
///
/// Any holder may read and subscribe. Role transitions are reserved to the
/// topology manager; the home WiFi flag is also set by request handling.
#[derive(Debug, Clone)]
pub struct TopologyHandle {
    tx: Arc<watch::Sender<TopologyStatus>>,
}

impl TopologyHandle {
    /// Create a handle in the `Scanning` state
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(TopologyStatus::default());
        Self { tx: Arc::new(tx) }
    }

    /// Current status
    pub fn status(&self) -> TopologyStatus {
        self.tx.borrow().clone()
    }

    /// Current role
    pub fn state(&self) -> TopologyState {
        self.tx.borrow().state.clone()
    }

    /// Whether this node is a root
    pub fn is_root(&self) -> bool {
        matches!(
            self.tx.borrow().state,
            TopologyState::StandaloneRoot | TopologyState::MergeNegotiation
        )
    }

    /// Whether this node is a child
    pub fn is_child(&self) -> bool {
        self.tx.borrow().state == TopologyState::ConnectedChild
    }

    /// Whether a restart has been requested
    pub fn restart_requested(&self) -> bool {
        matches!(self.tx.borrow().state, TopologyState::RestartRequested { .. })
    }

    /// Subscribe to status changes
    pub fn subscribe(&self) -> watch::Receiver<TopologyStatus> {
        self.tx.subscribe()
    }

    /// Record whether the station is on a home network
    pub fn set_home_wifi(&self, connected: bool) {
        self.tx.send_if_modified(|status| {
            let changed = status.connected_to_home_wifi != connected;
            if changed {
                info!("Home WiFi {}", if connected { "connected" } else { "lost" });
            }
            status.connected_to_home_wifi = connected;
            changed
        });
    }

    /// Drop the mesh token after the root refused it
    pub fn invalidate_mesh_token(&self) {
        self.tx.send_if_modified(|status| status.mesh_token.take().is_some());
    }

    pub(crate) fn transition(&self, next: TopologyState) {
        self.tx.send_if_modified(|status| {
            if let TopologyState::RestartRequested { .. } = status.state {
                debug!("Ignoring transition to {} after restart request", next);
                return false;
            }
            if status.state == next {
                return false;
            }
            info!("Topology {} -> {}", status.state, next);
            status.state = next;
            true
        });
    }

    pub(crate) fn update(&self, apply: impl FnOnce(&mut TopologyStatus)) {
        self.tx.send_modify(apply);
    }
}

impl Default for TopologyHandle {
    fn default() -> Self {
        Self::new()
    }
}
