//! Node identity derived from the BMS device name.

use crate::TopologyError;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Device name prefix
pub const NAME_PREFIX: &str = "bms_";

/// Parse the node id out of a `bms_NN` device name.
///
/// Digits after the prefix are read up to the first non-digit and narrowed
/// to a byte; a name with no digits yields 0.
pub fn parse_device_name(name: &str) -> Result<u8, TopologyError> {
    let digits = name
        .strip_prefix(NAME_PREFIX)
        .ok_or_else(|| TopologyError::Identity(name.to_string()))?;

    let value = digits
        .bytes()
        .take_while(u8::is_ascii_digit)
        .fold(0u32, |acc, d| acc.wrapping_mul(10).wrapping_add((d - b'0') as u32));
    Ok(value as u8)
}

/// Format a node id as a device name
pub fn device_name(id: u8) -> String {
    format!("{}{:02}", NAME_PREFIX, id)
}

/// Shared, renameable node id
#[derive(Debug, Clone, Default)]
pub struct NodeIdentity {
    id: Arc<AtomicU8>,
}

impl NodeIdentity {
    /// Create an identity with a fixed id
    pub fn new(id: u8) -> Self {
        Self {
            id: Arc::new(AtomicU8::new(id)),
        }
    }

    /// Create an identity from a device name
    pub fn from_device_name(name: &str) -> Result<Self, TopologyError> {
        parse_device_name(name).map(Self::new)
    }

    /// Current id
    pub fn get(&self) -> u8 {
        self.id.load(Ordering::Relaxed)
    }

    /// Replace the id
    pub fn set(&self, id: u8) {
        self.id.store(id, Ordering::Relaxed);
    }

    /// Current id formatted as a device name
    pub fn device_name(&self) -> String {
        device_name(self.get())
    }
}
