//! Message router and job dispatch.
//!
//! The router owns the node's shared state: connected clients, the peer
//! mailbox, the forwarded-message slot and the outbound links. Every job
//! the worker takes from the queue ends up in its [`JobHandler`] impl.

use crate::bridge::RadioBridge;
use crate::collab::{
    Bms, ClientSink, DatagramSink, LazyLink, LinkConnector, LinkSend, Radio, SharedBms,
};
use crate::dns::captive_answer;
use crate::request::{connect_wifi_request, RequestExecutor, RequestTiming};
use crate::telemetry::{data_message, scale_for_frontend, TelemetrySnapshot};
use crate::RouterError;
use async_trait::async_trait;
use mesh_session::handshake::MESH_PATH;
use mesh_session::{
    ClientTable, ConnectionId, DnsQuery, Job, JobHandler, PeerKind, SessionError, TokenIssuer,
};
use mesh_storage::{
    ForwardSlot, KvStore, Mailbox, Peer, StorageError, TakeMode, WifiSettings,
};
use mesh_topology::{
    NodeIdentity, TopologyHandle, TopologyManager, WifiDriver, WifiEvent, CHILD_AP_ADDR,
    DEFAULT_AP_ADDR,
};
use mesh_wire::{packet_from_json, packet_to_json, RadioPacket};
use serde_json::Value;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Cloud acknowledgement a receiver does not forward
const CLOUD_ACK: &str = "OK";

/// Router settings
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// This node is a LoRa receiver bridging the radio to the cloud
    pub receiver: bool,
    /// Cloud WebSocket, e.g. `wss://example.com/api/esp_ws`
    pub cloud_uri: String,
    /// Address of a root as seen from its children
    pub root_addr: Ipv4Addr,
    /// Port of the root's WebSocket server
    pub root_port: u16,
    /// Attempts per browser send before the client is evicted
    pub send_attempts: u32,
    /// Pause between browser send attempts
    pub send_retry_delay: Duration,
    /// Bound on opening an outbound link
    pub link_timeout: Duration,
    /// Home WiFi connection timing
    pub request: RequestTiming,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            receiver: false,
            cloud_uri: "wss://localhost/api/esp_ws".to_string(),
            root_addr: DEFAULT_AP_ADDR,
            root_port: 80,
            send_attempts: 5,
            send_retry_delay: Duration::from_secs(1),
            link_timeout: Duration::from_secs(10),
            request: RequestTiming::default(),
        }
    }
}

/// Everything a router is built from
pub struct NodeContext {
    /// Node id
    pub identity: NodeIdentity,
    /// Topology state machine
    pub topology: Arc<TopologyManager>,
    /// One-time tokens shared with the login endpoint
    pub tokens: Arc<TokenIssuer>,
    /// Persistent settings
    pub kv: Arc<dyn KvStore>,
    /// WiFi radio
    pub wifi: Arc<dyn WifiDriver>,
    /// Battery management chip, absent on a LoRa receiver
    pub bms: Option<Arc<dyn Bms>>,
    /// LoRa radio, absent when the node has none
    pub radio: Option<Arc<dyn Radio>>,
    /// Accepted WebSocket connections
    pub clients: Arc<dyn ClientSink>,
    /// Opens the cloud link
    pub cloud: Arc<dyn LinkConnector>,
    /// Opens a child's link to its root
    pub root: Arc<dyn LinkConnector>,
    /// Sends captive DNS answers
    pub dns: Option<Arc<dyn DatagramSink>>,
}

/// Routes messages between browsers, mesh peers, the radio and the cloud
pub struct MessageRouter {
    identity: NodeIdentity,
    manager: Arc<TopologyManager>,
    topology: TopologyHandle,
    tokens: Arc<TokenIssuer>,
    kv: Arc<dyn KvStore>,
    wifi: Arc<dyn WifiDriver>,
    bms: Option<Arc<SharedBms>>,
    bridge: Option<RadioBridge>,
    sink: Arc<dyn ClientSink>,
    dns: Option<Arc<dyn DatagramSink>>,
    clients: ClientTable,
    mailbox: Mailbox,
    forward: ForwardSlot,
    cloud: LazyLink,
    root: LazyLink,
    requests: RequestExecutor,
    config: RouterConfig,
}

impl MessageRouter {
    /// Build a router
    pub fn new(context: NodeContext, config: RouterConfig) -> Self {
        let topology = context.topology.handle().clone();
        let bms = context.bms.map(|bms| Arc::new(SharedBms::new(bms)));
        let requests = RequestExecutor::new(
            context.identity.clone(),
            bms.clone(),
            context.kv.clone(),
            context.wifi.clone(),
            topology.clone(),
            config.request.clone(),
        );

        Self {
            identity: context.identity,
            manager: context.topology,
            topology,
            tokens: context.tokens,
            kv: context.kv,
            wifi: context.wifi,
            bms,
            bridge: context.radio.map(RadioBridge::new),
            sink: context.clients,
            dns: context.dns,
            clients: ClientTable::default(),
            mailbox: Mailbox::default(),
            forward: ForwardSlot::default(),
            cloud: LazyLink::new("cloud", context.cloud, config.link_timeout),
            root: LazyLink::new("root", context.root, config.link_timeout),
            requests,
            config,
        }
    }

    /// Node id
    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    /// Topology status
    pub fn topology(&self) -> &TopologyHandle {
        &self.topology
    }

    /// Topology state machine
    pub fn manager(&self) -> &Arc<TopologyManager> {
        &self.manager
    }

    /// Messages waiting for the radio
    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    /// Cloud message waiting for the radio, on a receiver
    pub fn forward_slot(&self) -> &ForwardSlot {
        &self.forward
    }

    /// Connected WebSocket clients
    pub fn clients(&self) -> &ClientTable {
        &self.clients
    }

    /// Issue the one-time token a client presents on its handshake
    pub async fn issue_token(&self) -> String {
        self.tokens.issue().await
    }

    /// Stations attached to this node's access point
    pub fn connected_stations(&self) -> usize {
        self.topology.status().connected_stations
    }

    /// A competing root asked this node to give up its role
    pub fn on_yield_request(&self) {
        self.manager.on_yield_request();
    }

    /// A station joined or left this node's access point
    pub fn on_wifi_event(&self, event: WifiEvent) {
        self.manager.on_wifi_event(event);
    }

    /// Validate a WebSocket handshake and register the client
    pub async fn on_handshake(
        &self,
        connection: ConnectionId,
        uri: &str,
    ) -> Result<PeerKind, RouterError> {
        let record = self.tokens.accept(connection, uri).await?;
        let kind = record.kind;
        self.clients.add(record).await.map_err(|e| match e {
            SessionError::CapacityExceeded(_) => RouterError::CapacityExceeded,
            other => other.into(),
        })?;
        info!("WebSocket handshake complete for {} ({:?})", connection, kind);
        Ok(kind)
    }

    /// Forget a closed connection
    pub async fn on_disconnect(&self, connection: ConnectionId) {
        self.clients.remove(connection).await;
    }

    /// Handle a text frame from a connected client.
    ///
    /// Browser messages are executed and answered on the same connection.
    /// Mesh peer messages are stored in the mailbox under their `esp_id`.
    pub async fn on_websocket_text(
        &self,
        connection: ConnectionId,
        text: &str,
    ) -> Result<(), RouterError> {
        let Some(record) = self.clients.get(connection).await else {
            warn!("Message from unregistered connection {}", connection);
            return Err(RouterError::Malformed(format!(
                "{} has not completed a handshake",
                connection
            )));
        };
        debug!("Received WebSocket message from {}: {}", connection, text);

        let message: Value = serde_json::from_str(text).map_err(|e| {
            error!("Failed to parse JSON from {}: {}", connection, e);
            RouterError::from(e)
        })?;

        match record.kind {
            PeerKind::Browser => {
                let response = self.requests.perform(&message).await?;
                self.sink.send(connection, &response.to_string()).await
            }
            PeerKind::MeshPeer(_) => {
                let Some(id) = message.get("esp_id").and_then(Value::as_i64) else {
                    error!("Mesh message without esp_id: {}", text);
                    return Err(RouterError::Malformed("missing esp_id".into()));
                };
                let peer = Peer::try_from(id)?;
                self.mailbox.put(peer, text).await.map_err(|e| match e {
                    StorageError::CapacityExceeded(_) => RouterError::CapacityExceeded,
                    other => other.into(),
                })
            }
        }
    }

    /// Handle a message received on an outbound link.
    ///
    /// A receiver stages it for the radio unless it is a cloud
    /// acknowledgement; any other node executes it and answers upstream.
    pub async fn on_cloud_message(&self, text: &str) -> Result<(), RouterError> {
        let message: Value = serde_json::from_str(text).map_err(|e| {
            error!("Invalid JSON from link: {}", text);
            RouterError::from(e)
        })?;

        if !self.config.receiver {
            let response = self.requests.perform(&message).await?;
            self.reply_upstream(&response.to_string()).await;
            return Ok(());
        }

        let (Some(typ), Some(content)) = (message.get("type"), message.get("content")) else {
            error!("Couldn't parse link message: {}", text);
            return Err(RouterError::Malformed("missing type or content".into()));
        };
        if typ.as_str() == Some("response") && content.as_str() == Some(CLOUD_ACK) {
            debug!("Ignoring cloud acknowledgement");
            return Ok(());
        }

        info!("Staging cloud message for the radio");
        self.forward
            .stage(&message.to_string())
            .await
            .map_err(|e| match e {
                StorageError::CapacityExceeded(_) => RouterError::CapacityExceeded,
                other => other.into(),
            })
    }

    /// Handle bytes received from the radio
    pub async fn on_radio_bytes(&self, bytes: &[u8]) -> Result<(), RouterError> {
        let Some(bridge) = &self.bridge else {
            return Ok(());
        };
        for packet in bridge.feed(bytes).await {
            if let Err(e) = self.on_radio_packet(packet).await {
                warn!("Radio packet not handled: {}", e);
            }
        }
        Ok(())
    }

    /// Read the BMS into the cached snapshot
    pub async fn update_telemetry(&self) -> Result<(), RouterError> {
        if let Some(bms) = &self.bms {
            bms.refresh().await?;
        }
        Ok(())
    }

    /// Send telemetry to browsers and the cloud, then check the home link
    pub async fn broadcast_telemetry(&self) -> Result<(), RouterError> {
        let home = self.topology.status().connected_to_home_wifi;

        if self.config.receiver {
            // nothing to report, but the cloud link carries messages for the radio
            if home {
                if let Err(e) = self.cloud.ensure(&self.config.cloud_uri).await {
                    warn!("Cloud link unavailable: {}", e);
                }
            }
        } else if let Some(message) = self.local_data_message().await? {
            let scaled = scale_for_frontend(&message).to_string();
            for connection in self.clients.browsers().await {
                self.send_to_browser(connection, &scaled).await;
            }

            if home {
                let batch = Value::Array(vec![message]).to_string();
                if let Err(e) = self.cloud.send(&self.config.cloud_uri, &batch).await {
                    warn!("Cloud send failed: {}", e);
                }
            }
        }

        self.check_home_wifi().await;
        Ok(())
    }

    /// Send this node's telemetry to its root, on a child
    pub async fn relay_to_root(&self) -> Result<(), RouterError> {
        if !self.topology.is_child() {
            return Ok(());
        }
        let status = self.topology.status();
        let token = match status.mesh_token.as_deref() {
            Some(token) if !token.is_empty() => token,
            _ => return Ok(()),
        };
        if !status.connected_to_root || status.connected_to_home_wifi {
            return Ok(());
        }
        let Some(message) = self.local_data_message().await? else {
            return Ok(());
        };

        let uri = format!(
            "ws://{}:{}{}?auth_token={}&esp_id={}",
            self.config.root_addr,
            self.config.root_port,
            MESH_PATH,
            token,
            self.identity.get()
        );
        match self.root.send(&uri, &message.to_string()).await {
            Ok(LinkSend::Sent) => Ok(()),
            Ok(LinkSend::Skipped) => {
                debug!("Root link down, relay skipped");
                Ok(())
            }
            Err(e) => {
                // tokens are single use; log in again before reconnecting
                self.topology.invalidate_mesh_token();
                Err(e)
            }
        }
    }

    /// Transmit one packet in this radio slot
    pub async fn lora_transmit(&self) -> Result<(), RouterError> {
        let Some(bridge) = &self.bridge else {
            return Ok(());
        };

        if self.config.receiver {
            let Some(text) = self.forward.take().await else {
                return Ok(());
            };
            let message: Value = serde_json::from_str(&text)?;
            return bridge.transmit(&packet_from_json(&message)?).await;
        }

        if !self.topology.is_root() {
            return Ok(());
        }
        if bridge.backlog_len().await == 0 {
            self.refill_backlog(bridge).await?;
        }
        match bridge.next().await {
            Some(packet) => bridge.transmit(&packet).await,
            None => Ok(()),
        }
    }

    /// Poll the radio
    pub async fn lora_receive(&self) -> Result<(), RouterError> {
        let Some(bridge) = &self.bridge else {
            return Ok(());
        };
        for packet in bridge.poll().await? {
            if let Err(e) = self.on_radio_packet(packet).await {
                warn!("Radio packet not handled: {}", e);
            }
        }
        Ok(())
    }

    /// Answer a captive DNS query with this node's AP address
    pub async fn answer_dns(&self, query: DnsQuery) -> Result<(), RouterError> {
        let Some(dns) = &self.dns else {
            return Ok(());
        };
        let address = if self.topology.is_child() {
            CHILD_AP_ADDR
        } else {
            DEFAULT_AP_ADDR
        };
        let answer = captive_answer(&query.payload, address)?;
        debug!("DNS request from {}, answering {}", query.source, address);
        dns.send_to(answer, query.source).await
    }

    async fn on_radio_packet(&self, packet: RadioPacket) -> Result<(), RouterError> {
        let message = packet_to_json(&packet);

        if self.config.receiver {
            let text = match packet {
                RadioPacket::Data(_) => Value::Array(vec![message]).to_string(),
                RadioPacket::Response(_) => message.to_string(),
                other => {
                    debug!("Receiver ignoring {:?} packet", other.packet_type());
                    return Ok(());
                }
            };
            if !self.topology.status().connected_to_home_wifi {
                warn!("No home WiFi, dropping radio message");
                return Ok(());
            }
            self.cloud.send(&self.config.cloud_uri, &text).await?;
            return Ok(());
        }

        match packet {
            RadioPacket::Query(_) | RadioPacket::Request(_) => {
                let response = self.requests.perform(&message).await?;
                self.reply_upstream(&response.to_string()).await;
                if let Some(bridge) = &self.bridge {
                    bridge.enqueue_first(packet_from_json(&response)?).await;
                }
                Ok(())
            }
            other => {
                debug!("Ignoring radio {:?} packet", other.packet_type());
                Ok(())
            }
        }
    }

    /// Queue mailbox messages and our own telemetry for the radio
    async fn refill_backlog(&self, bridge: &RadioBridge) -> Result<(), RouterError> {
        let mut packets = Vec::new();
        for entry in self.mailbox.take_all(TakeMode::Drain).await {
            let packet = serde_json::from_str::<Value>(&entry.message)
                .map_err(RouterError::from)
                .and_then(|message| packet_from_json(&message).map_err(RouterError::from));
            match packet {
                Ok(packet) => packets.push(packet),
                Err(e) => warn!("Dropping mailbox message from {}: {}", entry.peer, e),
            }
        }
        if let Some(message) = self.local_data_message().await? {
            packets.push(packet_from_json(&message)?);
        }
        debug!("Radio backlog refilled with {} packets", packets.len());
        bridge.enqueue(packets).await;
        Ok(())
    }

    async fn local_data_message(&self) -> Result<Option<Value>, RouterError> {
        let Some(snapshot) = self.snapshot().await? else {
            return Ok(None);
        };
        Ok(Some(data_message(self.identity.get(), &snapshot)?))
    }

    async fn snapshot(&self) -> Result<Option<TelemetrySnapshot>, RouterError> {
        let Some(bms) = &self.bms else {
            return Ok(None);
        };
        let mut snapshot = bms.latest().await?;
        snapshot.wifi = self.topology.status().connected_to_home_wifi;
        Ok(Some(snapshot))
    }

    async fn send_to_browser(&self, connection: ConnectionId, text: &str) {
        for attempt in 1..=self.config.send_attempts {
            match self.sink.send(connection, text).await {
                Ok(()) => return,
                Err(e) => {
                    debug!(
                        "Send to {} failed ({}/{}): {}",
                        connection, attempt, self.config.send_attempts, e
                    );
                    if attempt < self.config.send_attempts {
                        tokio::time::sleep(self.config.send_retry_delay).await;
                    }
                }
            }
        }
        error!("Failed to send frame to {}, removing client", connection);
        self.clients.remove(connection).await;
    }

    /// Send on the root link from a child, otherwise on the cloud link
    async fn reply_upstream(&self, text: &str) {
        let status = self.topology.status();
        let link = if self.topology.is_child() && !status.connected_to_home_wifi {
            &self.root
        } else {
            &self.cloud
        };
        if let Err(e) = link.send_if_open(text).await {
            warn!("Reply not sent: {}", e);
        }
    }

    /// Clear the home WiFi flag once the station drops, and rejoin if allowed
    async fn check_home_wifi(&self) {
        if self.wifi.is_station_connected().await {
            return;
        }
        self.topology.set_home_wifi(false);

        let settings = match WifiSettings::load(self.kv.as_ref()).await {
            Ok(settings) => settings,
            Err(e) => {
                error!("Could not read WiFi settings: {}", e);
                return;
            }
        };
        if !settings.auto_connect || settings.ssid.is_empty() {
            return;
        }

        info!("Auto-connecting to {}", settings.ssid);
        let request = connect_wifi_request(self.identity.get(), &settings);
        if let Err(e) = self.requests.perform(&request).await {
            warn!("Auto-connect failed: {}", e);
        }
    }
}

#[async_trait]
impl JobHandler for MessageRouter {
    async fn handle(&self, job: Job) -> anyhow::Result<()> {
        match job {
            Job::UpdateTelemetry => self.update_telemetry().await?,
            Job::SendTelemetry => self.broadcast_telemetry().await?,
            Job::MeshConnect => self.manager.connect_to_root().await?,
            Job::MeshRelaySend => self.relay_to_root().await?,
            Job::MergeCheck => self.manager.merge_check().await?,
            Job::DnsRespond(query) => self.answer_dns(query).await?,
            Job::WebsocketReceive(text) => self.on_cloud_message(&text).await?,
            Job::LoraTransmit => self.lora_transmit().await?,
            Job::LoraReceive => self.lora_receive().await?,
        }
        Ok(())
    }
}
