//! Root election, child attachment and root merge negotiation.
//!
//! ```text
//!            boot
//!             |
//!         Scanning --(no root seen)--> StandaloneRoot <--+
//!             |                          |               |
//!       (root seen)               (merge timer,     (peer yields /
//!             |                  other root seen)   we stay root)
//!             v                          v               |
//!       ConnectedChild           MergeNegotiation -------+
//!             |                          |
//!   (no root after backoff)        (peer has more stations,
//!             |                     or peer asked us to yield)
//!             +--------> RestartRequested <--------------+
//! ```
//!
//! Three or more roots appearing at once are not reconciled: each pair
//! negotiates independently on its own merge timer.

use crate::{
    backoff_delay, child_ap_name, compare_mac, find_root, root_ap_name, ApConfig, RootPeer,
    ScanRecord, TopologyError, TopologyHandle, TopologyState, WifiDriver, WifiMode,
    CHILD_AP_ADDR, DEFAULT_AP_ADDR, MERGE_AP_ADDR, RECEIVER_AP_NAME,
};
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Timing and retry settings
#[derive(Debug, Clone)]
pub struct TopologyConfig {
    /// This node is a LoRa receiver
    pub receiver: bool,
    /// Station connect attempts before giving up
    pub connect_attempts: u32,
    /// Pause after switching to station mode before scanning
    pub scan_settle: Duration,
    /// Pause after a connect attempt is accepted
    pub connect_wait: Duration,
    /// Pause after attaching to a root before logging in
    pub login_settle: Duration,
    /// Pause after moving the AP subnet
    pub subnet_settle: Duration,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            receiver: false,
            connect_attempts: 10,
            scan_settle: Duration::from_millis(100),
            connect_wait: Duration::from_secs(1),
            login_settle: Duration::from_secs(5),
            subnet_settle: Duration::from_secs(5),
        }
    }
}

/// Events reported by the WiFi driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiEvent {
    /// A station joined this node's access point
    StationConnected,
    /// A station left this node's access point
    StationDisconnected,
}

/// Owns the topology state machine
pub struct TopologyManager {
    wifi: Arc<dyn WifiDriver>,
    peer: Arc<dyn RootPeer>,
    handle: TopologyHandle,
    config: TopologyConfig,
}

impl TopologyManager {
    /// Create a manager publishing through `handle`
    pub fn new(
        wifi: Arc<dyn WifiDriver>,
        peer: Arc<dyn RootPeer>,
        handle: TopologyHandle,
        config: TopologyConfig,
    ) -> Self {
        Self {
            wifi,
            peer,
            handle,
            config,
        }
    }

    /// Status handle
    pub fn handle(&self) -> &TopologyHandle {
        &self.handle
    }

    /// Decide the initial role from a station-mode scan
    pub async fn boot(
        &self,
        esp_id: u8,
        state_of_charge: u16,
    ) -> Result<TopologyState, TopologyError> {
        self.handle.transition(TopologyState::Scanning);

        let records = self.scan_in_station_mode().await?;
        let root = find_root(&records);
        self.wifi.set_mode(WifiMode::AccessPointStation).await?;

        match root {
            None => {
                let ssid = if self.config.receiver {
                    RECEIVER_AP_NAME.to_string()
                } else {
                    root_ap_name(esp_id, state_of_charge)
                };
                self.wifi
                    .configure_ap(&ApConfig {
                        ssid,
                        address: DEFAULT_AP_ADDR,
                    })
                    .await?;
                self.handle.transition(TopologyState::StandaloneRoot);
            }
            Some(root) => {
                info!("Found root {} ({})", root.ssid, root.bssid);
                self.wifi
                    .configure_ap(&ApConfig {
                        ssid: child_ap_name(esp_id, state_of_charge),
                        address: CHILD_AP_ADDR,
                    })
                    .await?;
                self.handle.transition(TopologyState::ConnectedChild);
            }
        }

        Ok(self.handle.state())
    }

    /// Attach a child to a root, run by the mesh connect timer.
    ///
    /// Skipped unless this node is a child whose station is down and not on
    /// home WiFi. When no root can be found even after a backoff the node
    /// requests a restart so it can come back as a root.
    pub async fn connect_to_root(&self) -> Result<(), TopologyError> {
        let status = self.handle.status();
        if !self.handle.is_child() || status.connected_to_home_wifi {
            return Ok(());
        }
        if self.wifi.is_station_connected().await {
            // the root consumed our token and the relay link needs a fresh one
            if status.connected_to_root && status.mesh_token.is_none() {
                self.login().await;
            }
            return Ok(());
        }

        let records = self.scan_in_station_mode().await?;
        self.wifi.set_mode(WifiMode::AccessPointStation).await?;

        let attached = match find_root(&records) {
            Some(root) => self.connect_station(root).await,
            None => false,
        };

        if attached {
            self.handle.update(|s| s.connected_to_root = true);
            tokio::time::sleep(self.config.login_settle).await;
            self.login().await;
            return Ok(());
        }

        self.handle.update(|s| {
            s.connected_to_root = false;
            s.mesh_token = None;
        });

        // double check there really is no root before nominating ourselves
        let records = self.scan_in_station_mode().await?;
        if find_root(&records).is_none() {
            let delay = backoff_delay(&self.wifi.mac());
            info!("No root found, delaying {:?} before the last scan", delay);
            tokio::time::sleep(delay).await;

            if find_root(&self.wifi.scan().await?).is_none() {
                info!("Still no root, restarting to take over");
                self.handle.transition(TopologyState::RestartRequested {
                    reason: "no root reachable".into(),
                });
                return Ok(());
            }
        }

        self.wifi.set_mode(WifiMode::AccessPointStation).await?;
        Ok(())
    }

    /// Look for a competing root and settle which of the two yields.
    ///
    /// Run by the merge timer on a root that is not on home WiFi. The node
    /// with fewer attached stations restarts; on a tie the node that found
    /// the other one yields.
    pub async fn merge_check(&self) -> Result<(), TopologyError> {
        let status = self.handle.status();
        if status.state != TopologyState::StandaloneRoot || status.connected_to_home_wifi {
            return Ok(());
        }

        let records = self.wifi.scan().await?;
        let Some(other) = find_root(&records) else {
            return Ok(());
        };
        warn!("Another root found: {} ({})", other.ssid, other.bssid);

        let order = compare_mac(&self.wifi.mac(), &other.bssid);
        self.handle.transition(TopologyState::MergeNegotiation);

        if !self.connect_station(other).await {
            self.handle.transition(TopologyState::StandaloneRoot);
            return Ok(());
        }

        // the lower address moves aside so the other root stays reachable on the default subnet
        let moved = order == Ordering::Less;
        if moved {
            self.wifi.set_ap_subnet(MERGE_AP_ADDR).await?;
            info!("Moved AP to {}", MERGE_AP_ADDR);
            tokio::time::sleep(self.config.subnet_settle).await;
        }

        match self.peer.connected_clients().await {
            Ok(theirs) => {
                let ours = self.handle.status().connected_stations;
                // -1 for our own station attached to them
                if theirs as i64 - 1 >= ours as i64 {
                    info!("Other root has {} stations to our {}, yielding", theirs, ours);
                    self.handle.transition(TopologyState::RestartRequested {
                        reason: format!("yielding to root {}", other.bssid),
                    });
                    return Ok(());
                }
                if let Err(e) = self.peer.ask_to_yield().await {
                    error!("Yield request failed: {}", e);
                }
            }
            Err(e) => error!("Station count request failed: {}", e),
        }

        if moved {
            self.wifi.set_ap_subnet(DEFAULT_AP_ADDR).await?;
            info!("Moved AP back to {}", DEFAULT_AP_ADDR);
        }
        self.wifi.disconnect().await?;
        self.handle.transition(TopologyState::StandaloneRoot);
        Ok(())
    }

    /// A competing root asked this node to give up its role
    pub fn on_yield_request(&self) {
        info!("Competing root asked us to restart");
        self.handle.transition(TopologyState::RestartRequested {
            reason: "asked to yield".into(),
        });
    }

    /// Track stations attached to this node's access point
    pub fn on_wifi_event(&self, event: WifiEvent) {
        self.handle.update(|s| {
            s.connected_stations = match event {
                WifiEvent::StationConnected => s.connected_stations + 1,
                WifiEvent::StationDisconnected => s.connected_stations.saturating_sub(1),
            };
        });
    }

    async fn login(&self) {
        match self.peer.login().await {
            Ok(token) => {
                info!("Logged in to root");
                self.handle.update(|s| s.mesh_token = Some(token));
            }
            Err(e) => {
                warn!("Root login failed: {}", e);
                self.handle.update(|s| s.mesh_token = None);
            }
        }
    }

    async fn scan_in_station_mode(&self) -> Result<Vec<ScanRecord>, TopologyError> {
        self.wifi.set_mode(WifiMode::Station).await?;
        tokio::time::sleep(self.config.scan_settle).await;
        self.wifi.scan().await
    }

    async fn connect_station(&self, root: &ScanRecord) -> bool {
        info!("Connecting to {}", root.ssid);
        for attempt in 1..=self.config.connect_attempts {
            match self.wifi.connect(&root.ssid, "").await {
                Ok(()) => {
                    tokio::time::sleep(self.config.connect_wait).await;
                    return true;
                }
                Err(e) => warn!(
                    "Connect attempt {}/{} failed: {}",
                    attempt, self.config.connect_attempts, e
                ),
            }
        }
        false
    }
}
