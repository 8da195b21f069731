//! JSON file key-value backend

use crate::{KvStore, StorageError};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

type Namespaces = BTreeMap<String, BTreeMap<String, String>>;

/// Key-value store persisted as one JSON document.
///
/// Every write rewrites the file through a temporary sibling and a rename,
/// so a crash leaves either the old or the new document.
pub struct FileKvStore {
    path: PathBuf,
    state: Mutex<Namespaces>,
}

impl FileKvStore {
    /// Open a store, loading the file if it exists
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }

        let state = if path.exists() {
            let state = Self::load(&path)?;
            info!("Loaded key-value store from {}", path.display());
            state
        } else {
            Namespaces::new()
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    fn load(path: &Path) -> Result<Namespaces, StorageError> {
        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            warn!("Key-value store {} is empty, starting fresh", path.display());
            return Ok(Namespaces::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn save(&self, state: &Namespaces) -> Result<(), StorageError> {
        let tmp = self.path.with_extension("tmp");
        let content = serde_json::to_string_pretty(state)?;
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[async_trait]
impl KvStore for FileKvStore {
    async fn persist_get(&self, namespace: &str, key: &str) -> Result<Option<String>, StorageError> {
        let state = self.state.lock().await;
        Ok(state.get(namespace).and_then(|ns| ns.get(key)).cloned())
    }

    async fn persist_set(
        &self,
        namespace: &str,
        key: &str,
        value: &str,
    ) -> Result<(), StorageError> {
        debug!("KV set {}/{} -> {}", namespace, key, self.path.display());
        let mut state = self.state.lock().await;
        state
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        self.save(&state)
    }
}
