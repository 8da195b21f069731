//! Router errors

use mesh_session::SessionError;
use mesh_storage::StorageError;
use mesh_topology::TopologyError;
use mesh_wire::WireError;
use thiserror::Error;

/// Errors raised while routing or executing a message
#[derive(Error, Debug)]
pub enum RouterError {
    /// Message is not valid JSON or lacks a required field
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// Message type the router does not handle
    #[error("Unsupported message type: {0}")]
    NotSupported(String),

    /// A bounded table had no room
    #[error("Capacity exceeded")]
    CapacityExceeded,

    /// I/O with a collaborator failed and may succeed later
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Radio framing or packet error
    #[error("Wire error: {0}")]
    Wire(#[from] WireError),

    /// Mailbox or key-value store error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Handshake or queue error
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// WiFi or topology error
    #[error("Topology error: {0}")]
    Topology(#[from] TopologyError),
}

impl From<serde_json::Error> for RouterError {
    fn from(err: serde_json::Error) -> Self {
        RouterError::Malformed(err.to_string())
    }
}
