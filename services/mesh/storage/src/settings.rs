//! Persisted home WiFi credentials.

use crate::{KvStore, StorageError};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Namespace holding the WiFi keys
pub const WIFI_NAMESPACE: &str = "WIFI";
/// SSID key
pub const KEY_SSID: &str = "SSID";
/// Password key
pub const KEY_PASSWORD: &str = "PASSWORD";
/// Auto-connect flag key, stored as `0`/`1`
pub const KEY_AUTO_CONNECT: &str = "AUTO_CONNECT";

/// Home WiFi credentials and the auto-connect flag
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WifiSettings {
    /// Network name
    pub ssid: String,
    /// Network password
    pub password: String,
    /// Reconnect automatically when the link drops
    pub auto_connect: bool,
}

impl WifiSettings {
    /// Read the settings, absent keys read as empty
    pub async fn load(kv: &dyn KvStore) -> Result<Self, StorageError> {
        let ssid = kv.persist_get(WIFI_NAMESPACE, KEY_SSID).await?;
        let password = kv.persist_get(WIFI_NAMESPACE, KEY_PASSWORD).await?;
        let auto_connect = kv.persist_get(WIFI_NAMESPACE, KEY_AUTO_CONNECT).await?;

        Ok(Self {
            ssid: ssid.unwrap_or_default(),
            password: password.unwrap_or_default(),
            auto_connect: auto_connect.as_deref() == Some("1"),
        })
    }

    /// Write all three keys
    pub async fn store(&self, kv: &dyn KvStore) -> Result<(), StorageError> {
        kv.persist_set(WIFI_NAMESPACE, KEY_SSID, &self.ssid).await?;
        kv.persist_set(WIFI_NAMESPACE, KEY_PASSWORD, &self.password)
            .await?;
        kv.persist_set(
            WIFI_NAMESPACE,
            KEY_AUTO_CONNECT,
            if self.auto_connect { "1" } else { "0" },
        )
        .await
    }

    /// Write `defaults` on first boot, when no SSID has been stored yet
    pub async fn seed(kv: &dyn KvStore, defaults: &WifiSettings) -> Result<Self, StorageError> {
        if kv.persist_get(WIFI_NAMESPACE, KEY_SSID).await?.is_none() {
            info!("Seeding WiFi settings from configuration");
            defaults.store(kv).await?;
        }
        Self::load(kv).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryKvStore;

    #[tokio::test]
    async fn test_seed_only_on_first_boot() {
        let kv = MemoryKvStore::new();
        let defaults = WifiSettings {
            ssid: "factory".into(),
            password: "pw".into(),
            auto_connect: false,
        };

        let seeded = WifiSettings::seed(&kv, &defaults).await.unwrap();
        assert_eq!(seeded, defaults);

        let changed = WifiSettings {
            ssid: "home".into(),
            password: "secret".into(),
            auto_connect: true,
        };
        changed.store(&kv).await.unwrap();

        let reloaded = WifiSettings::seed(&kv, &defaults).await.unwrap();
        assert_eq!(reloaded, changed);
    }
}
