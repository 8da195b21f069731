//! Execution of `query` and `request` messages.
//!
//! Browsers, the cloud, a root relaying for the cloud and the radio all
//! send the same message shapes; every one of them lands here.

use crate::{RouterError, SharedBms};
use mesh_storage::{KvStore, WifiSettings};
use mesh_topology::{device_name, NodeIdentity, TopologyHandle, WifiDriver};
use mesh_wire::STILL_THERE;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Home WiFi connection timing
#[derive(Debug, Clone)]
pub struct RequestTiming {
    /// Pause after configuring the station
    pub wifi_settle: Duration,
    /// Association checks after the settle
    pub wifi_checks: u32,
    /// Pause between checks
    pub wifi_check_interval: Duration,
}

impl Default for RequestTiming {
    fn default() -> Self {
        Self {
            wifi_settle: Duration::from_secs(5),
            wifi_checks: 10,
            wifi_check_interval: Duration::from_secs(1),
        }
    }
}

/// Runs requests against the node's collaborators
pub struct RequestExecutor {
    identity: NodeIdentity,
    bms: Option<Arc<SharedBms>>,
    kv: Arc<dyn KvStore>,
    wifi: Arc<dyn WifiDriver>,
    topology: TopologyHandle,
    timing: RequestTiming,
}

impl RequestExecutor {
    /// Create an executor; `bms` is absent on a LoRa receiver
    pub fn new(
        identity: NodeIdentity,
        bms: Option<Arc<SharedBms>>,
        kv: Arc<dyn KvStore>,
        wifi: Arc<dyn WifiDriver>,
        topology: TopologyHandle,
        timing: RequestTiming,
    ) -> Self {
        Self {
            identity,
            bms,
            kv,
            wifi,
            topology,
            timing,
        }
    }

    /// Execute a message and build the response to send back.
    ///
    /// Fails with `Malformed` when `type` or `content` is missing and with
    /// `NotSupported` for a type other than `query` or `request`; no
    /// response is sent in either case.
    pub async fn perform(&self, message: &Value) -> Result<Value, RouterError> {
        let (Some(typ), Some(content)) = (message.get("type"), message.get("content")) else {
            error!("Error in request message: {}", message);
            return Err(RouterError::Malformed("missing type or content".into()));
        };

        let mut reply = Map::new();
        match typ.as_str() {
            Some("query") => {
                if content.as_str() == Some(STILL_THERE) {
                    reply.insert("response".into(), "yes".into());
                }
            }
            Some("request") => {
                let summary = content.get("summary").and_then(Value::as_str);
                let data = content.get("data");
                if let Some(status) = self.run(summary, data).await {
                    reply.insert("status".into(), status.into());
                }
            }
            _ => return Err(RouterError::NotSupported(typ.to_string())),
        }

        // id read after the request, so a rename answers with the new id
        Ok(json!({
            "type": "response",
            "esp_id": self.identity.get(),
            "content": Value::Object(reply),
        }))
    }

    async fn run(&self, summary: Option<&str>, data: Option<&Value>) -> Option<&'static str> {
        match summary {
            Some("change-settings") => {
                let Some(data) = data else {
                    error!("change-settings without data");
                    return Some("error");
                };
                Some(status(self.change_settings(data).await))
            }
            Some("connect-wifi") => {
                let Some(data) = data else {
                    error!("connect-wifi without data");
                    return Some("error");
                };
                match self.connect_wifi(data).await {
                    Ok(true) => Some("success"),
                    Ok(false) => None,
                    Err(e) => {
                        error!("connect-wifi failed: {}", e);
                        Some("error")
                    }
                }
            }
            Some("reset-bms") => Some(status(self.bms()?.reset().await)),
            Some("unseal-bms") => Some(status(self.bms()?.unseal().await)),
            other => {
                warn!("Unknown request summary {:?}", other);
                None
            }
        }
    }

    fn bms(&self) -> Option<&SharedBms> {
        if self.bms.is_none() {
            warn!("No BMS on this node");
        }
        self.bms.as_deref()
    }

    async fn change_settings(&self, data: &Value) -> Result<(), RouterError> {
        let bms = self
            .bms()
            .ok_or_else(|| RouterError::NotSupported("change-settings without a BMS".into()))?;

        let new_id = data.get("new_esp_id").and_then(Value::as_i64).unwrap_or(0);
        let new_id = u8::try_from(new_id)
            .map_err(|_| RouterError::Malformed(format!("new_esp_id {} out of range", new_id)))?;
        let otc = match data.get("OTC").and_then(Value::as_i64) {
            Some(otc) => Some(
                i16::try_from(otc)
                    .map_err(|_| RouterError::Malformed(format!("OTC {} out of range", otc)))?,
            ),
            None => None,
        };

        if new_id != 0 && new_id != self.identity.get() {
            bms.rename(&device_name(new_id)).await?;
            self.identity.set(new_id);
            info!("Node id is now {}", new_id);
        }

        if let Some(otc) = otc {
            bms.update_otc(otc).await?;
        }
        Ok(())
    }

    /// Join a home network; Ok(false) when it did not come up in time
    async fn connect_wifi(&self, data: &Value) -> Result<bool, RouterError> {
        if self.topology.status().connected_to_home_wifi {
            info!("Already on home WiFi");
            return Ok(false);
        }

        let settings = WifiSettings {
            ssid: data
                .get("ssid")
                .and_then(Value::as_str)
                .ok_or_else(|| RouterError::Malformed("connect-wifi without ssid".into()))?
                .to_string(),
            password: data
                .get("password")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            auto_connect: data.get("auto_connect").and_then(Value::as_bool) == Some(true),
        };
        if let Err(e) = settings.store(self.kv.as_ref()).await {
            warn!("Could not persist WiFi settings: {}", e);
        }

        info!("Connecting to AP {}", settings.ssid);
        self.wifi.connect(&settings.ssid, &settings.password).await?;
        tokio::time::sleep(self.timing.wifi_settle).await;

        for attempt in 1..=self.timing.wifi_checks {
            if self.wifi.is_station_connected().await {
                info!("Connected to home WiFi {}", settings.ssid);
                self.topology.set_home_wifi(true);
                return Ok(true);
            }
            info!("Not connected, retrying ({}/{})", attempt, self.timing.wifi_checks);
            if let Err(e) = self.wifi.connect(&settings.ssid, &settings.password).await {
                warn!("Connect attempt failed: {}", e);
            }
            tokio::time::sleep(self.timing.wifi_check_interval).await;
        }

        warn!("Gave up connecting to {}", settings.ssid);
        Ok(false)
    }
}

fn status<T, E: std::fmt::Display>(result: Result<T, E>) -> &'static str {
    match result {
        Ok(_) => "success",
        Err(e) => {
            error!("Request failed: {}", e);
            "error"
        }
    }
}

/// Build the `connect-wifi` request for persisted credentials
pub fn connect_wifi_request(esp_id: u8, settings: &WifiSettings) -> Value {
    json!({
        "type": "request",
        "esp_id": esp_id,
        "content": {
            "summary": "connect-wifi",
            "data": {
                "ssid": settings.ssid,
                "password": settings.password,
                "auto_connect": settings.auto_connect,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Bms, TelemetrySnapshot};
    use async_trait::async_trait;
    use mesh_storage::MemoryKvStore;
    use mesh_topology::{ApConfig, MacAddress, ScanRecord, TopologyError, WifiMode};
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeBms {
        resets: AtomicU32,
        otc: Mutex<i16>,
        otc_writes: AtomicU32,
        names: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Bms for FakeBms {
        async fn snapshot(&self) -> Result<TelemetrySnapshot, RouterError> {
            Ok(TelemetrySnapshot::default())
        }
        async fn reset(&self) -> Result<(), RouterError> {
            self.resets.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn unseal(&self) -> Result<(), RouterError> {
            Ok(())
        }
        async fn seal(&self) -> Result<(), RouterError> {
            Ok(())
        }
        async fn read_otc(&self) -> Result<i16, RouterError> {
            Ok(*self.otc.lock().unwrap())
        }
        async fn write_otc(&self, otc: i16) -> Result<(), RouterError> {
            self.otc_writes.fetch_add(1, Ordering::SeqCst);
            *self.otc.lock().unwrap() = otc;
            Ok(())
        }
        async fn write_device_name(&self, name: &str) -> Result<(), RouterError> {
            self.names.lock().unwrap().push(name.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeWifi {
        reachable: bool,
        connected: AtomicBool,
        attempts: AtomicU32,
    }

    #[async_trait]
    impl WifiDriver for FakeWifi {
        async fn set_mode(&self, _mode: WifiMode) -> Result<(), TopologyError> {
            Ok(())
        }
        async fn scan(&self) -> Result<Vec<ScanRecord>, TopologyError> {
            Ok(Vec::new())
        }
        async fn connect(&self, _ssid: &str, _password: &str) -> Result<(), TopologyError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            self.connected.store(self.reachable, Ordering::SeqCst);
            Ok(())
        }
        async fn disconnect(&self) -> Result<(), TopologyError> {
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        }
        async fn is_station_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
        fn mac(&self) -> MacAddress {
            MacAddress::default()
        }
        async fn set_ap_subnet(&self, _address: Ipv4Addr) -> Result<(), TopologyError> {
            Ok(())
        }
        async fn configure_ap(&self, _config: &ApConfig) -> Result<(), TopologyError> {
            Ok(())
        }
    }

    struct Fixture {
        bms: Arc<FakeBms>,
        wifi: Arc<FakeWifi>,
        kv: Arc<MemoryKvStore>,
        topology: TopologyHandle,
        identity: NodeIdentity,
        executor: RequestExecutor,
    }

    fn fixture(reachable: bool) -> Fixture {
        let bms = Arc::new(FakeBms::default());
        *bms.otc.lock().unwrap() = 550;
        let wifi = Arc::new(FakeWifi {
            reachable,
            ..Default::default()
        });
        let kv = Arc::new(MemoryKvStore::new());
        let topology = TopologyHandle::new();
        let identity = NodeIdentity::new(3);
        let executor = RequestExecutor::new(
            identity.clone(),
            Some(Arc::new(SharedBms::new(bms.clone()))),
            kv.clone(),
            wifi.clone(),
            topology.clone(),
            RequestTiming::default(),
        );
        Fixture {
            bms,
            wifi,
            kv,
            topology,
            identity,
            executor,
        }
    }

    fn request(summary: &str, data: Option<Value>) -> Value {
        let mut content = json!({ "summary": summary });
        if let Some(data) = data {
            content["data"] = data;
        }
        json!({ "type": "request", "esp_id": 3, "content": content })
    }

    #[tokio::test]
    async fn test_liveness_query() {
        let f = fixture(true);
        let reply = f
            .executor
            .perform(&json!({ "type": "query", "content": STILL_THERE }))
            .await
            .unwrap();
        assert_eq!(
            reply,
            json!({ "type": "response", "esp_id": 3, "content": { "response": "yes" } })
        );
    }

    #[tokio::test]
    async fn test_reset_replies_success() {
        let f = fixture(true);
        let reply = f.executor.perform(&request("reset-bms", None)).await.unwrap();
        assert_eq!(
            reply,
            json!({ "type": "response", "esp_id": 3, "content": { "status": "success" } })
        );
        assert_eq!(f.bms.resets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_change_settings_renames_and_skips_same_otc() {
        let f = fixture(true);
        let reply = f
            .executor
            .perform(&request(
                "change-settings",
                Some(json!({ "new_esp_id": 12, "OTC": 550 })),
            ))
            .await
            .unwrap();

        assert_eq!(reply["content"]["status"], "success");
        assert_eq!(reply["esp_id"], 12);
        assert_eq!(f.identity.get(), 12);
        assert_eq!(*f.bms.names.lock().unwrap(), vec!["bms_12"]);
        assert_eq!(f.bms.otc_writes.load(Ordering::SeqCst), 0);

        // same id, new threshold
        f.executor
            .perform(&request(
                "change-settings",
                Some(json!({ "new_esp_id": 12, "OTC": 600 })),
            ))
            .await
            .unwrap();
        assert_eq!(f.bms.names.lock().unwrap().len(), 1);
        assert_eq!(f.bms.otc_writes.load(Ordering::SeqCst), 1);
        assert_eq!(*f.bms.otc.lock().unwrap(), 600);
    }

    #[tokio::test]
    async fn test_change_settings_rejects_out_of_range_id() {
        let f = fixture(true);
        for new_id in [256, 259, -1] {
            let reply = f
                .executor
                .perform(&request(
                    "change-settings",
                    Some(json!({ "new_esp_id": new_id, "OTC": 600 })),
                ))
                .await
                .unwrap();
            assert_eq!(reply["content"]["status"], "error");
        }
        assert_eq!(f.identity.get(), 3);
        assert!(f.bms.names.lock().unwrap().is_empty());
        assert_eq!(f.bms.otc_writes.load(Ordering::SeqCst), 0);

        let reply = f
            .executor
            .perform(&request("change-settings", Some(json!({ "OTC": 40000 }))))
            .await
            .unwrap();
        assert_eq!(reply["content"]["status"], "error");
        assert_eq!(*f.bms.otc.lock().unwrap(), 550);
    }

    #[tokio::test]
    async fn test_degraded_requests() {
        let f = fixture(true);

        let reply = f.executor.perform(&request("change-settings", None)).await.unwrap();
        assert_eq!(reply["content"], json!({ "status": "error" }));

        let reply = f.executor.perform(&request("defrost", None)).await.unwrap();
        assert_eq!(reply["content"], json!({}));

        let err = f
            .executor
            .perform(&json!({ "type": "register", "content": {} }))
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::NotSupported(_)));

        let err = f
            .executor
            .perform(&json!({ "type": "request" }))
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::Malformed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_wifi_success_persists_credentials() {
        let f = fixture(true);
        let reply = f
            .executor
            .perform(&request(
                "connect-wifi",
                Some(json!({ "ssid": "home", "password": "pw", "auto_connect": true })),
            ))
            .await
            .unwrap();

        assert_eq!(reply["content"]["status"], "success");
        assert!(f.topology.status().connected_to_home_wifi);

        let stored = WifiSettings::load(f.kv.as_ref()).await.unwrap();
        assert_eq!(stored.ssid, "home");
        assert_eq!(stored.password, "pw");
        assert!(stored.auto_connect);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_wifi_timeout_has_no_status() {
        let f = fixture(false);
        let start = tokio::time::Instant::now();
        let reply = f
            .executor
            .perform(&request("connect-wifi", Some(json!({ "ssid": "far away" }))))
            .await
            .unwrap();

        assert_eq!(reply["content"], json!({}));
        assert!(!f.topology.status().connected_to_home_wifi);
        assert!(start.elapsed() >= Duration::from_secs(15));
        // initial attempt plus one per failed check
        assert_eq!(f.wifi.attempts.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn test_synthetic_connect_request() {
        let settings = WifiSettings {
            ssid: "home".into(),
            password: "pw".into(),
            auto_connect: true,
        };
        let message = connect_wifi_request(7, &settings);
        assert_eq!(message["content"]["summary"], "connect-wifi");
        assert_eq!(message["content"]["data"]["ssid"], "home");
    }
}
