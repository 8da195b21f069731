//! Simulated hardware for running a node on a host.
//!
//! The BMS produces a slowly drifting pack, the WiFi radio sees no other
//! access points so the node always boots as a root, and the LoRa radio
//! transmits into the log.

use async_trait::async_trait;
use bytes::Bytes;
use mesh_routing::{Bms, Radio, RouterError, TelemetrySnapshot};
use mesh_topology::{
    ApConfig, MacAddress, ScanRecord, TopologyError, WifiDriver, WifiMode,
};
use rand::Rng;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info};

struct PackState {
    device_name: String,
    otc: i16,
    sealed: bool,
    /// State of charge in percent
    charge: f32,
}

/// Battery pack with random drift
pub struct SimBms {
    state: Mutex<PackState>,
}

impl SimBms {
    /// Create a pack reporting `device_name`
    pub fn new(device_name: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(PackState {
                device_name: device_name.into(),
                otc: 550,
                sealed: true,
                charge: 80.0,
            }),
        }
    }
}

#[async_trait]
impl Bms for SimBms {
    async fn snapshot(&self) -> Result<TelemetrySnapshot, RouterError> {
        let mut state = self.state.lock().await;
        let mut rng = rand::thread_rng();
        state.charge = (state.charge - rng.gen_range(0.0..0.2)).clamp(5.0, 100.0);

        // cells in mV, currents in mA, temperatures in centi-degrees
        let cell = |rng: &mut rand::rngs::ThreadRng| 3600 + rng.gen_range(0..200) as u16;
        let (v1, v2, v3, v4) = (cell(&mut rng), cell(&mut rng), cell(&mut rng), cell(&mut rng));
        let current = -rng.gen_range(800..1200) as i16;
        let temp = || 2500 + rand::thread_rng().gen_range(0..300) as i16;

        Ok(TelemetrySnapshot {
            lat: 60.17,
            lon: 24.94,
            q: state.charge as u8,
            h: 98,
            v: (v1 + v2 + v3 + v4) / 4,
            v1,
            v2,
            v3,
            v4,
            i: current / 10,
            i1: current,
            i2: current,
            i3: current,
            i4: current,
            a_t: temp() / 10,
            c_t: temp() / 10,
            t1: temp(),
            t2: temp(),
            t3: temp(),
            t4: temp(),
            otc: state.otc,
            ..Default::default()
        }
        .with_timestamp(&chrono::Utc::now()))
    }

    async fn reset(&self) -> Result<(), RouterError> {
        info!("Simulated BMS reset");
        Ok(())
    }

    async fn unseal(&self) -> Result<(), RouterError> {
        self.state.lock().await.sealed = false;
        Ok(())
    }

    async fn seal(&self) -> Result<(), RouterError> {
        self.state.lock().await.sealed = true;
        Ok(())
    }

    async fn read_otc(&self) -> Result<i16, RouterError> {
        Ok(self.state.lock().await.otc)
    }

    async fn write_otc(&self, otc: i16) -> Result<(), RouterError> {
        self.state.lock().await.otc = otc;
        Ok(())
    }

    async fn write_device_name(&self, name: &str) -> Result<(), RouterError> {
        let mut state = self.state.lock().await;
        if state.sealed {
            debug!("Writing device name on a sealed pack");
        }
        state.device_name = name.to_string();
        Ok(())
    }
}

/// WiFi radio that joins any network it is asked to
pub struct SimWifi {
    mac: MacAddress,
    station_up: AtomicBool,
    ap: Mutex<Option<ApConfig>>,
}

impl SimWifi {
    /// Create a radio with a MAC derived from the node id
    pub fn new(esp_id: u8) -> Self {
        Self {
            mac: MacAddress([0x24, 0x6F, 0x28, 0x00, 0x00, esp_id]),
            station_up: AtomicBool::new(false),
            ap: Mutex::new(None),
        }
    }

    /// Access point currently configured
    pub async fn access_point(&self) -> Option<ApConfig> {
        self.ap.lock().await.clone()
    }
}

#[async_trait]
impl WifiDriver for SimWifi {
    async fn set_mode(&self, mode: WifiMode) -> Result<(), TopologyError> {
        debug!("WiFi mode {:?}", mode);
        Ok(())
    }

    async fn scan(&self) -> Result<Vec<ScanRecord>, TopologyError> {
        Ok(Vec::new())
    }

    async fn connect(&self, ssid: &str, _password: &str) -> Result<(), TopologyError> {
        info!("Station joining {}", ssid);
        self.station_up.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TopologyError> {
        self.station_up.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn is_station_connected(&self) -> bool {
        self.station_up.load(Ordering::SeqCst)
    }

    fn mac(&self) -> MacAddress {
        self.mac
    }

    async fn set_ap_subnet(&self, address: Ipv4Addr) -> Result<(), TopologyError> {
        if let Some(ap) = self.ap.lock().await.as_mut() {
            ap.address = address;
        }
        Ok(())
    }

    async fn configure_ap(&self, config: &ApConfig) -> Result<(), TopologyError> {
        info!("Access point {} on {}", config.ssid, config.address);
        *self.ap.lock().await = Some(config.clone());
        Ok(())
    }
}

/// LoRa radio with nobody else on air
#[derive(Default)]
pub struct SimRadio {
    inbound: Mutex<Vec<Bytes>>,
}

#[async_trait]
impl Radio for SimRadio {
    async fn transmit_raw(&self, frame: Bytes) -> Result<(), RouterError> {
        debug!("LoRa transmit {} bytes", frame.len());
        Ok(())
    }

    async fn receive_raw(&self) -> Result<Option<Bytes>, RouterError> {
        let mut inbound = self.inbound.lock().await;
        if inbound.is_empty() {
            return Ok(None);
        }
        Ok(Some(inbound.remove(0)))
    }
}
