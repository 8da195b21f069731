//! Table of accepted WebSocket clients.

use crate::SessionError;
use std::fmt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Maximum number of simultaneous WebSocket clients
pub const WS_CONFIG_MAX_CLIENTS: usize = 3;

/// Handle of one server-side WebSocket connection
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Who is on the other end of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerKind {
    /// Local browser session
    Browser,
    /// Child node relaying telemetry, with its node id
    MeshPeer(u8),
}

/// An accepted client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRecord {
    /// Connection handle
    pub connection: ConnectionId,
    /// Token used in the handshake
    pub token: String,
    /// Peer kind
    pub kind: PeerKind,
}

/// Bounded arena of client records, at most one per connection
#[derive(Debug)]
pub struct ClientTable {
    slots: RwLock<Vec<Option<ClientRecord>>>,
}

impl ClientTable {
    /// Create a table with `capacity` slots
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: RwLock::new(vec![None; capacity]),
        }
    }

    /// Add a client; a connection that is already present is ignored
    pub async fn add(&self, record: ClientRecord) -> Result<(), SessionError> {
        let mut slots = self.slots.write().await;

        if slots
            .iter()
            .flatten()
            .any(|c| c.connection == record.connection)
        {
            debug!("Client {} already registered", record.connection);
            return Ok(());
        }

        let capacity = slots.len();
        match slots.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => {
                info!("Client {} added as {:?}", record.connection, record.kind);
                *slot = Some(record);
                Ok(())
            }
            None => {
                warn!("no space for client {}", record.connection);
                Err(SessionError::CapacityExceeded(capacity))
            }
        }
    }

    /// Remove a client, returning its record
    pub async fn remove(&self, connection: ConnectionId) -> Option<ClientRecord> {
        let mut slots = self.slots.write().await;
        let slot = slots
            .iter_mut()
            .find(|slot| matches!(slot, Some(c) if c.connection == connection))?;
        let removed = slot.take();
        if removed.is_some() {
            info!("Client {} removed", connection);
        }
        removed
    }

    /// Look up a client
    pub async fn get(&self, connection: ConnectionId) -> Option<ClientRecord> {
        self.slots
            .read()
            .await
            .iter()
            .flatten()
            .find(|c| c.connection == connection)
            .cloned()
    }

    /// Connections of every browser client
    pub async fn browsers(&self) -> Vec<ConnectionId> {
        self.slots
            .read()
            .await
            .iter()
            .flatten()
            .filter(|c| c.kind == PeerKind::Browser)
            .map(|c| c.connection)
            .collect()
    }

    /// Number of clients
    pub async fn len(&self) -> usize {
        self.slots.read().await.iter().flatten().count()
    }

    /// Whether the table is empty
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for ClientTable {
    fn default() -> Self {
        Self::new(WS_CONFIG_MAX_CLIENTS)
    }
}
