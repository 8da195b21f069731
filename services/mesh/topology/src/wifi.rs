//! WiFi driver interface and access point naming.

use crate::{MacAddress, TopologyError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// SSID prefix advertised by a root
pub const ROOT_PREFIX: &str = "ROOT ";
/// AP name of a LoRa receiver
pub const RECEIVER_AP_NAME: &str = "LoRa RECEIVER";

/// Default AP address, where children reach their root
pub const DEFAULT_AP_ADDR: Ipv4Addr = Ipv4Addr::new(192, 168, 4, 1);
/// AP address of a child, clear of its root's subnet
pub const CHILD_AP_ADDR: Ipv4Addr = Ipv4Addr::new(192, 168, 5, 1);
/// Temporary AP address of a root talking to a competing root
pub const MERGE_AP_ADDR: Ipv4Addr = Ipv4Addr::new(192, 168, 10, 1);

/// Radio operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WifiMode {
    /// Station only, used for scanning
    Station,
    /// Access point and station
    AccessPointStation,
}

/// One scan result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRecord {
    /// Network name
    pub ssid: String,
    /// Access point address
    pub bssid: MacAddress,
    /// Signal strength in dBm
    pub rssi: i8,
}

impl ScanRecord {
    /// Whether this network is a mesh root
    pub fn is_root(&self) -> bool {
        self.ssid.starts_with(ROOT_PREFIX)
    }
}

/// Access point settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApConfig {
    /// Advertised name
    pub ssid: String,
    /// Gateway address of the /24 the AP serves
    pub address: Ipv4Addr,
}

/// AP name of a root: `ROOT bms_NN: C%`
pub fn root_ap_name(esp_id: u8, state_of_charge: u16) -> String {
    format!("{}bms_{:02}: {}%", ROOT_PREFIX, esp_id, state_of_charge)
}

/// AP name of a child: `bms_NN: C%`
pub fn child_ap_name(esp_id: u8, state_of_charge: u16) -> String {
    format!("bms_{:02}: {}%", esp_id, state_of_charge)
}

/// First root in a scan, strongest signal first
pub fn find_root(records: &[ScanRecord]) -> Option<&ScanRecord> {
    records
        .iter()
        .filter(|r| r.is_root())
        .max_by_key(|r| r.rssi)
}

/// Station and access point control
#[async_trait]
pub trait WifiDriver: Send + Sync {
    /// Switch operating mode
    async fn set_mode(&self, mode: WifiMode) -> Result<(), TopologyError>;

    /// Scan for access points
    async fn scan(&self) -> Result<Vec<ScanRecord>, TopologyError>;

    /// Start connecting the station; success means the attempt was accepted
    async fn connect(&self, ssid: &str, password: &str) -> Result<(), TopologyError>;

    /// Disconnect the station
    async fn disconnect(&self) -> Result<(), TopologyError>;

    /// Whether the station is associated
    async fn is_station_connected(&self) -> bool;

    /// Address of this node's access point
    fn mac(&self) -> MacAddress;

    /// Move the access point to another /24
    async fn set_ap_subnet(&self, address: Ipv4Addr) -> Result<(), TopologyError>;

    /// Apply access point settings
    async fn configure_ap(&self, config: &ApConfig) -> Result<(), TopologyError>;
}
