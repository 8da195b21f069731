//! Session error types.

use thiserror::Error;

/// Session errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SessionError {
    /// Work queue is full, the job was dropped
    #[error("queue full, dropping job {0}")]
    QueueFull(&'static str),

    /// Work queue has no worker left
    #[error("queue closed")]
    Closed,

    /// Bounded table is full
    #[error("capacity exceeded (limit {0})")]
    CapacityExceeded(usize),

    /// WebSocket upgrade request rejected
    #[error("handshake rejected: {0}")]
    Handshake(String),
}
