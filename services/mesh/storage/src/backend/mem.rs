//! In-memory key-value backend for development and testing

use crate::{KvStore, StorageError};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// In-memory key-value store
#[derive(Clone, Default)]
pub struct MemoryKvStore {
    /// (namespace, key) -> value
    entries: Arc<DashMap<(String, String), String>>,
}

impl MemoryKvStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn persist_get(&self, namespace: &str, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self
            .entries
            .get(&(namespace.to_string(), key.to_string()))
            .map(|v| v.clone()))
    }

    async fn persist_set(
        &self,
        namespace: &str,
        key: &str,
        value: &str,
    ) -> Result<(), StorageError> {
        debug!("KV set {}/{}", namespace, key);
        self.entries
            .insert((namespace.to_string(), key.to_string()), value.to_string());
        Ok(())
    }
}
