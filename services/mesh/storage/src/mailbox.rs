//! Peer mailbox and forward slot.
//!
//! The mailbox is a lossy latest-value table: one entry per mesh peer, last
//! write wins, fixed capacity. It suits telemetry and nothing that needs
//! delivery guarantees.

use crate::{Peer, StorageError};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

/// Default mailbox capacity
pub const MESH_SIZE: usize = 5;

/// Text capacity of the forward slot: a radio packet minus its two sentinels
pub const FORWARD_SLOT_CAPACITY: usize = 253;

/// Latest message from one peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxEntry {
    /// Sending peer
    pub peer: Peer,
    /// Message text
    pub message: String,
}

/// How [`Mailbox::take_all`] treats the entries it returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TakeMode {
    /// Return and remove every entry
    Drain,
    /// Return copies and leave the table unchanged
    Peek,
}

/// Bounded per-peer mailbox
#[derive(Debug)]
pub struct Mailbox {
    slots: Mutex<Vec<Option<MailboxEntry>>>,
}

impl Mailbox {
    /// Create a mailbox with room for `capacity` peers
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Mutex::new(vec![None; capacity]),
        }
    }

    /// Store the latest message from a peer.
    ///
    /// Overwrites the peer's existing entry, otherwise claims a free slot.
    /// When the table is full and the peer is new the message is dropped.
    pub async fn put(&self, peer: Peer, message: impl Into<String>) -> Result<(), StorageError> {
        let message = message.into();
        let mut slots = self.slots.lock().await;

        if let Some(entry) = slots.iter_mut().flatten().find(|e| e.peer == peer) {
            debug!("Mailbox overwrite peer={} len={}", peer, message.len());
            entry.message = message;
            return Ok(());
        }

        match slots.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => {
                debug!("Mailbox store peer={} len={}", peer, message.len());
                *slot = Some(MailboxEntry { peer, message });
                Ok(())
            }
            None => {
                error!("mailbox full, dropping message from peer {}", peer);
                Err(StorageError::CapacityExceeded(slots.len()))
            }
        }
    }

    /// Return every entry in slot order
    pub async fn take_all(&self, mode: TakeMode) -> Vec<MailboxEntry> {
        let mut slots = self.slots.lock().await;
        match mode {
            TakeMode::Drain => slots.iter_mut().filter_map(Option::take).collect(),
            TakeMode::Peek => slots.iter().flatten().cloned().collect(),
        }
    }

    /// Number of stored entries
    pub async fn len(&self) -> usize {
        self.slots.lock().await.iter().flatten().count()
    }

    /// Whether the mailbox holds no entries
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Maximum number of peers
    pub async fn capacity(&self) -> usize {
        self.slots.lock().await.len()
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new(MESH_SIZE)
    }
}

/// Single pending outbound radio message, newest wins
#[derive(Debug)]
pub struct ForwardSlot {
    pending: Mutex<Option<String>>,
    capacity: usize,
}

impl ForwardSlot {
    /// Create a slot holding at most `capacity` bytes of text
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: Mutex::new(None),
            capacity,
        }
    }

    /// Replace the pending message.
    ///
    /// Text longer than the slot is rejected and the pending message kept;
    /// a cut JSON document would not parse on the radio side.
    pub async fn stage(&self, text: &str) -> Result<(), StorageError> {
        if text.len() > self.capacity {
            warn!(
                "Forward slot rejected {} bytes (capacity {})",
                text.len(),
                self.capacity
            );
            return Err(StorageError::CapacityExceeded(self.capacity));
        }
        *self.pending.lock().await = Some(text.to_string());
        Ok(())
    }

    /// Remove and return the pending message
    pub async fn take(&self) -> Option<String> {
        self.pending.lock().await.take()
    }
}

impl Default for ForwardSlot {
    fn default() -> Self {
        Self::new(FORWARD_SLOT_CAPACITY)
    }
}
