//! Topology error types.

use thiserror::Error;

/// Topology errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    /// WiFi driver operation failed
    #[error("wifi: {0}")]
    Wifi(String),

    /// HTTP exchange with another root failed
    #[error("root peer: {0}")]
    Peer(String),

    /// Device name not of the form `bms_NN`
    #[error("invalid device name `{0}`, should begin with \"bms_\"")]
    Identity(String),

    /// Node must restart to recover
    #[error("irrecoverable: {0}")]
    Irrecoverable(String),
}
