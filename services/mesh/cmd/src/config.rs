//! Configuration handling for the bms-mesh node.
//!
//! Settings come from a YAML file, then `BMS_MESH_*` environment variables,
//! then command line flags, each layer overriding the previous one.

use anyhow::Result;
use mesh_wire::LoraParams;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Node configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Identity and role
    pub node: NodeSection,
    /// LoRa radio
    pub lora: LoraSection,
    /// Home WiFi defaults and root login credentials
    pub wifi: WifiSection,
    /// Cloud server
    pub cloud: CloudSection,
    /// Periodic job intervals
    pub timers: TimerSection,
}

/// Identity, role and local listeners
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    /// Device name the node id is derived from, `bms_NN`
    pub device_name: String,
    /// Run as a LoRa receiver bridging the radio to the cloud
    pub receiver: bool,
    /// Address the WebSocket and HTTP server binds to
    pub bind_addr: Ipv4Addr,
    /// WebSocket and HTTP port
    pub http_port: u16,
    /// Captive DNS port; 0 disables the responder
    pub dns_port: u16,
    /// Persist settings to this JSON file instead of memory
    pub kv_path: Option<PathBuf>,
    /// Address a child uses to reach its root
    pub root_addr: Ipv4Addr,
    /// Port of the root's server
    pub root_port: u16,
    /// Pause between rebuilds after a restart
    #[serde(with = "duration_str")]
    pub restart_delay: Duration,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            device_name: "bms_01".to_string(),
            receiver: false,
            bind_addr: Ipv4Addr::UNSPECIFIED,
            http_port: 80,
            dns_port: 53,
            kv_path: None,
            root_addr: mesh_topology::DEFAULT_AP_ADDR,
            root_port: 80,
            restart_delay: Duration::from_secs(1),
        }
    }
}

/// LoRa radio settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoraSection {
    /// Whether this node has a radio
    pub enabled: bool,
    /// Modulation
    #[serde(flatten)]
    pub params: LoraParams,
}

impl Default for LoraSection {
    fn default() -> Self {
        Self {
            enabled: true,
            params: LoraParams::default(),
        }
    }
}

/// Home WiFi defaults written on first boot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WifiSection {
    /// Home network name
    pub ssid: String,
    /// Home network password
    pub password: String,
    /// Rejoin the home network when it drops
    pub auto_connect: bool,
    /// Account a child presents to its root's login endpoint
    pub login_email: String,
    /// Password a child presents to its root's login endpoint
    pub login_password: String,
}

/// Cloud server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudSection {
    /// Cloud host name
    pub host: String,
}

impl Default for CloudSection {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
        }
    }
}

impl CloudSection {
    /// WebSocket URI of the cloud endpoint
    pub fn uri(&self) -> String {
        format!("wss://{}/api/esp_ws", self.host)
    }
}

/// Periodic job intervals
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerSection {
    /// Child attach attempts
    #[serde(with = "duration_str")]
    pub mesh_connect: Duration,
    /// Child telemetry relay to the root
    #[serde(with = "duration_str")]
    pub mesh_relay: Duration,
    /// Root merge checks
    #[serde(with = "duration_str")]
    pub merge: Duration,
    /// BMS reads
    #[serde(with = "duration_str")]
    pub read_data: Duration,
    /// Telemetry broadcast
    #[serde(with = "duration_str")]
    pub send_data: Duration,
    /// Radio polling
    #[serde(with = "duration_str")]
    pub lora_receive: Duration,
    /// Pause between jobs on the worker
    #[serde(with = "duration_str")]
    pub job_pace: Duration,
}

impl Default for TimerSection {
    fn default() -> Self {
        Self {
            mesh_connect: Duration::from_secs(1),
            mesh_relay: Duration::from_secs(1),
            merge: Duration::from_secs(60),
            read_data: Duration::from_secs(5),
            send_data: Duration::from_secs(5),
            lora_receive: Duration::from_secs(1),
            job_pace: mesh_session::DEFAULT_PACE,
        }
    }
}

/// Durations written the way `humantime` parses them, e.g. `1s` or `500ms`
mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

impl NodeConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let path = config_path.as_ref();
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => match serde_yaml::from_str::<NodeConfig>(&content) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", path);
                    config
                }
                Err(e) => {
                    warn!("Failed to parse config file {:?} ({}), using defaults", path, e);
                    Self::default()
                }
            },
            Err(_) => {
                warn!("Config file {:?} not found, using defaults", path);
                Self::default()
            }
        };

        config.apply_environment_overrides();

        info!(
            "Final node configuration: device={}, receiver={}, port={}, cloud={}",
            config.node.device_name,
            config.node.receiver,
            config.node.http_port,
            config.cloud.host
        );
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_environment_overrides(&mut self) {
        if let Ok(name) = std::env::var("BMS_MESH_DEVICE_NAME") {
            info!("Device name overridden by environment: {}", name);
            self.node.device_name = name;
        }

        if let Ok(receiver) = std::env::var("BMS_MESH_RECEIVER") {
            self.node.receiver = matches!(receiver.to_lowercase().as_str(), "1" | "true");
            info!("Receiver mode overridden by environment: {}", self.node.receiver);
        }

        if let Ok(port) = std::env::var("BMS_MESH_HTTP_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.node.http_port = port;
                info!("HTTP port overridden by environment: {}", port);
            }
        }

        if let Ok(port) = std::env::var("BMS_MESH_DNS_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.node.dns_port = port;
                info!("DNS port overridden by environment: {}", port);
            }
        }

        if let Ok(host) = std::env::var("BMS_MESH_CLOUD_HOST") {
            info!("Cloud host overridden by environment: {}", host);
            self.cloud.host = host;
        }

        if let Ok(ssid) = std::env::var("BMS_MESH_WIFI_SSID") {
            self.wifi.ssid = ssid;
        }

        if let Ok(password) = std::env::var("BMS_MESH_WIFI_PASSWORD") {
            self.wifi.password = password;
        }
    }

    /// Timing of outbound messages on the radio
    pub fn lora_transmit_interval(&self) -> Duration {
        Duration::from_millis(
            self.lora
                .params
                .transmission_delay_ms(mesh_wire::LORA_MAX_PACKET_LEN),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert_eq!(config.node.device_name, "bms_01");
        assert_eq!(config.node.http_port, 80);
        assert_eq!(config.timers.merge, Duration::from_secs(60));
        assert_eq!(config.cloud.uri(), "wss://localhost/api/esp_ws");
    }

    #[test]
    fn test_load_from_file() {
        let yaml_content = r#"
node:
  device_name: bms_07
  http_port: 8080
  dns_port: 0
lora:
  spreading_factor: 9
wifi:
  ssid: home
  auto_connect: true
cloud:
  host: battery.example.com
timers:
  merge: 2m
  read_data: 500ms
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let config = NodeConfig::load_from_file(temp_file.path()).unwrap();

        assert_eq!(config.node.device_name, "bms_07");
        assert_eq!(config.node.http_port, 8080);
        assert_eq!(config.node.dns_port, 0);
        assert_eq!(config.lora.params.spreading_factor, 9);
        assert_eq!(config.lora.params.preamble_len, 8);
        assert!(config.wifi.auto_connect);
        assert_eq!(config.cloud.uri(), "wss://battery.example.com/api/esp_ws");
        assert_eq!(config.timers.merge, Duration::from_secs(120));
        assert_eq!(config.timers.read_data, Duration::from_millis(500));
        assert_eq!(config.timers.mesh_connect, Duration::from_secs(1));
    }

    #[test]
    fn test_invalid_file_falls_back_to_defaults() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"node: [not, a, map").unwrap();

        let config = NodeConfig::load_from_file(temp_file.path()).unwrap();
        assert_eq!(config.node.http_port, 80);
    }

    #[test]
    fn test_environment_override() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"cloud:\n  host: from-file\n").unwrap();

        std::env::set_var("BMS_MESH_CLOUD_HOST", "from-env");
        let config = NodeConfig::load_from_file(temp_file.path()).unwrap();
        std::env::remove_var("BMS_MESH_CLOUD_HOST");

        assert_eq!(config.cloud.host, "from-env");
    }

    #[test]
    fn test_lora_transmit_interval() {
        let config = NodeConfig::default();
        assert_eq!(config.lora_transmit_interval(), Duration::from_millis(38630));
    }
}
