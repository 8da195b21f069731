//! Node-local state for the mesh: peer mailbox, forward slot and key-value persistence.
//!
//! This crate holds the small bounded stores a node keeps between jobs: the
//! latest message from each mesh peer waiting for radio egress, the single
//! pending cloud-to-radio message, and the `persist_get/persist_set` interface
//! to configuration storage with pluggable backends (in-memory, JSON file).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod mailbox;
pub mod settings;

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Mesh peer identifier (node id, never 0)
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Peer(u8);

impl Peer {
    /// Validate a node id
    pub fn new(id: u8) -> Result<Self, StorageError> {
        if id == 0 {
            return Err(StorageError::InvalidPeer(i64::from(id)));
        }
        Ok(Self(id))
    }

    /// Raw node id
    pub fn id(&self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for Peer {
    type Error = StorageError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        let id = u8::try_from(value).map_err(|_| StorageError::InvalidPeer(value))?;
        Peer::new(id)
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// Bounded table is full and the entry is new
    #[error("capacity exceeded (limit {0})")]
    CapacityExceeded(usize),
    /// Peer id outside the valid range
    #[error("invalid peer id {0}")]
    InvalidPeer(i64),
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Backend-specific error
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Persistent key-value storage, grouped by namespace
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a value
    async fn persist_get(&self, namespace: &str, key: &str) -> Result<Option<String>, StorageError>;

    /// Write a value, replacing any previous one
    async fn persist_set(&self, namespace: &str, key: &str, value: &str)
        -> Result<(), StorageError>;
}

/// Key-value backend configuration
#[derive(Clone, Debug, Default)]
pub enum KvMode {
    /// In-memory storage (dev/tests only)
    #[default]
    InMemory,
    /// JSON file on disk
    File {
        /// File path
        path: PathBuf,
    },
}

// Re-export backend implementations
pub use backend::file::FileKvStore;
pub use backend::mem::MemoryKvStore;
pub use mailbox::{ForwardSlot, Mailbox, MailboxEntry, TakeMode, FORWARD_SLOT_CAPACITY, MESH_SIZE};
pub use settings::WifiSettings;

/// Open a key-value store from configuration
pub async fn open_kv(mode: KvMode) -> Result<Arc<dyn KvStore>, StorageError> {
    match mode {
        KvMode::InMemory => Ok(Arc::new(MemoryKvStore::new())),
        KvMode::File { path } => Ok(Arc::new(FileKvStore::open(path).await?)),
    }
}
