//! In-process fakes for router integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use mesh_routing::{
    Bms, ClientSink, LinkConnector, LinkSession, MessageRouter, NodeContext, Radio, RouterConfig,
    RouterError, TelemetrySnapshot,
};
use mesh_session::{ConnectionId, TokenIssuer};
use mesh_storage::MemoryKvStore;
use mesh_topology::{
    ApConfig, MacAddress, NodeIdentity, RootPeer, ScanRecord, TopologyConfig, TopologyError,
    TopologyHandle, TopologyManager, WifiDriver, WifiMode,
};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

#[derive(Default)]
pub struct FakeBms {
    pub resets: AtomicU32,
    pub snapshot: Mutex<TelemetrySnapshot>,
}

#[async_trait]
impl Bms for FakeBms {
    async fn snapshot(&self) -> Result<TelemetrySnapshot, RouterError> {
        Ok(self.snapshot.lock().unwrap().clone())
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
        Ok(0)
    }
    async fn write_otc(&self, _otc: i16) -> Result<(), RouterError> {
        Ok(())
    }
    async fn write_device_name(&self, _name: &str) -> Result<(), RouterError> {
        Ok(())
    }
}

/// WiFi with a fixed scan result
pub struct FakeWifi {
    pub scan: Vec<ScanRecord>,
    pub connected: AtomicBool,
    pub mac: MacAddress,
    pub aps: Mutex<Vec<ApConfig>>,
}

impl FakeWifi {
    pub fn new(scan: Vec<ScanRecord>, mac: [u8; 6]) -> Self {
        Self {
            scan,
            connected: AtomicBool::new(false),
            mac: MacAddress(mac),
            aps: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl WifiDriver for FakeWifi {
    async fn set_mode(&self, _mode: WifiMode) -> Result<(), TopologyError> {
        Ok(())
    }
    async fn scan(&self) -> Result<Vec<ScanRecord>, TopologyError> {
        Ok(self.scan.clone())
    }
    async fn connect(&self, _ssid: &str, _password: &str) -> Result<(), TopologyError> {
        self.connected.store(true, Ordering::SeqCst);
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
        self.mac
    }
    async fn set_ap_subnet(&self, _address: Ipv4Addr) -> Result<(), TopologyError> {
        Ok(())
    }
    async fn configure_ap(&self, config: &ApConfig) -> Result<(), TopologyError> {
        self.aps.lock().unwrap().push(config.clone());
        Ok(())
    }
}

/// Root reached over the router's own login endpoint
#[derive(Default)]
pub struct RouterPeer {
    pub root: OnceLock<Arc<MessageRouter>>,
}

#[async_trait]
impl RootPeer for RouterPeer {
    async fn login(&self) -> Result<String, TopologyError> {
        match self.root.get() {
            Some(root) => Ok(root.issue_token().await),
            None => Err(TopologyError::Peer("no root".into())),
        }
    }
    async fn connected_clients(&self) -> Result<usize, TopologyError> {
        self.root
            .get()
            .map(|root| root.connected_stations())
            .ok_or_else(|| TopologyError::Peer("no root".into()))
    }
    async fn ask_to_yield(&self) -> Result<(), TopologyError> {
        if let Some(root) = self.root.get() {
            root.on_yield_request();
        }
        Ok(())
    }
}

/// Records frames sent to connections; fails for connections in `broken`
#[derive(Default)]
pub struct RecordingSink {
    pub sent: Mutex<Vec<(ConnectionId, String)>>,
    pub broken: Mutex<Vec<ConnectionId>>,
    pub attempts: AtomicU32,
}

impl RecordingSink {
    pub fn texts(&self, connection: ConnectionId) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| *c == connection)
            .map(|(_, t)| t.clone())
            .collect()
    }
}

#[async_trait]
impl ClientSink for RecordingSink {
    async fn send(&self, connection: ConnectionId, text: &str) -> Result<(), RouterError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.broken.lock().unwrap().contains(&connection) {
            return Err(RouterError::Transient("connection reset".into()));
        }
        self.sent.lock().unwrap().push((connection, text.to_string()));
        Ok(())
    }
}

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(100);

struct RouterSession {
    root: Arc<MessageRouter>,
    connection: ConnectionId,
}

#[async_trait]
impl LinkSession for RouterSession {
    fn is_connected(&self) -> bool {
        true
    }
    async fn send(&self, text: &str) -> Result<(), RouterError> {
        self.root.on_websocket_text(self.connection, text).await
    }
}

/// Connects a child's root link straight into another router
#[derive(Default)]
pub struct RouterConnector {
    pub root: OnceLock<Arc<MessageRouter>>,
}

#[async_trait]
impl LinkConnector for RouterConnector {
    async fn connect(&self, uri: &str) -> Result<Box<dyn LinkSession>, RouterError> {
        let root = self
            .root
            .get()
            .cloned()
            .ok_or_else(|| RouterError::Transient("unreachable".into()))?;
        let connection = ConnectionId(NEXT_CONNECTION.fetch_add(1, Ordering::SeqCst));
        root.on_handshake(connection, uri).await?;
        Ok(Box::new(RouterSession { root, connection }))
    }
}

/// Records text sent over a link
#[derive(Default)]
pub struct RecordingConnector {
    pub sent: Arc<Mutex<Vec<String>>>,
    pub uris: Mutex<Vec<String>>,
}

struct RecordingSession {
    sent: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl LinkSession for RecordingSession {
    fn is_connected(&self) -> bool {
        true
    }
    async fn send(&self, text: &str) -> Result<(), RouterError> {
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

#[async_trait]
impl LinkConnector for RecordingConnector {
    async fn connect(&self, uri: &str) -> Result<Box<dyn LinkSession>, RouterError> {
        self.uris.lock().unwrap().push(uri.to_string());
        Ok(Box::new(RecordingSession {
            sent: self.sent.clone(),
        }))
    }
}

/// Radio that records transmissions and replays queued receptions
#[derive(Default)]
pub struct FakeRadio {
    pub transmitted: Mutex<Vec<Bytes>>,
    pub inbound: Mutex<Vec<Bytes>>,
}

#[async_trait]
impl Radio for FakeRadio {
    async fn transmit_raw(&self, frame: Bytes) -> Result<(), RouterError> {
        self.transmitted.lock().unwrap().push(frame);
        Ok(())
    }
    async fn receive_raw(&self) -> Result<Option<Bytes>, RouterError> {
        let mut inbound = self.inbound.lock().unwrap();
        if inbound.is_empty() {
            Ok(None)
        } else {
            Ok(Some(inbound.remove(0)))
        }
    }
}

/// A node under test and its collaborators
pub struct Node {
    pub router: Arc<MessageRouter>,
    pub bms: Arc<FakeBms>,
    pub wifi: Arc<FakeWifi>,
    pub sink: Arc<RecordingSink>,
    pub radio: Arc<FakeRadio>,
    pub cloud: Arc<RecordingConnector>,
    pub peer: Arc<RouterPeer>,
    pub root_link: Arc<RouterConnector>,
}

pub struct NodeBuilder {
    pub esp_id: u8,
    pub scan: Vec<ScanRecord>,
    pub mac: [u8; 6],
    pub config: RouterConfig,
    pub with_bms: bool,
}

impl NodeBuilder {
    pub fn new(esp_id: u8) -> Self {
        Self {
            esp_id,
            scan: Vec::new(),
            mac: [0, 0, 0, 0, 0, esp_id],
            config: RouterConfig::default(),
            with_bms: true,
        }
    }

    pub fn seeing(mut self, scan: Vec<ScanRecord>) -> Self {
        self.scan = scan;
        self
    }

    pub fn receiver(mut self) -> Self {
        self.config.receiver = true;
        self.with_bms = false;
        self
    }

    pub fn build(self) -> Node {
        let bms = Arc::new(FakeBms::default());
        let wifi = Arc::new(FakeWifi::new(self.scan, self.mac));
        let sink = Arc::new(RecordingSink::default());
        let radio = Arc::new(FakeRadio::default());
        let cloud = Arc::new(RecordingConnector::default());
        let peer = Arc::new(RouterPeer::default());
        let root_link = Arc::new(RouterConnector::default());

        let manager = TopologyManager::new(
            wifi.clone(),
            peer.clone(),
            TopologyHandle::new(),
            TopologyConfig {
                receiver: self.config.receiver,
                ..Default::default()
            },
        );
        let context = NodeContext {
            identity: NodeIdentity::new(self.esp_id),
            topology: Arc::new(manager),
            tokens: Arc::new(TokenIssuer::default()),
            kv: Arc::new(MemoryKvStore::new()),
            wifi: wifi.clone(),
            bms: self.with_bms.then(|| bms.clone() as Arc<dyn Bms>),
            radio: Some(radio.clone() as Arc<dyn Radio>),
            clients: sink.clone(),
            cloud: cloud.clone(),
            root: root_link.clone(),
            dns: None,
        };

        Node {
            router: Arc::new(MessageRouter::new(context, self.config)),
            bms,
            wifi,
            sink,
            radio,
            cloud,
            peer,
            root_link,
        }
    }
}

pub fn root_record(ssid: &str, mac: [u8; 6]) -> ScanRecord {
    ScanRecord {
        ssid: ssid.into(),
        bssid: MacAddress(mac),
        rssi: -40,
    }
}

/// Register a browser on a node through the token exchange
pub async fn connect_browser(node: &Node, id: u64) -> ConnectionId {
    let token = node.router.issue_token().await;
    let connection = ConnectionId(id);
    node.router
        .on_handshake(connection, &format!("/browser_ws?auth_token={}", token))
        .await
        .unwrap();
    connection
}
