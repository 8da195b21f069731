//! Wiring of one node instance.
//!
//! A [`Node`] owns every task it spawns. Dropping the instance through
//! [`Node::shutdown`] aborts them all, which is how the supervisor tears a
//! node down before rebuilding it.

use crate::config::NodeConfig;
use crate::net::{self, ConnectionRegistry, HttpRootPeer, WsConnector};
use crate::sim::{SimBms, SimRadio, SimWifi};
use crate::{component_info, component_warn, dns};
use anyhow::Result;
use mesh_routing::{Bms, DatagramSink, MessageRouter, NodeContext, Radio, RouterConfig};
use mesh_session::{spawn_periodic, Job, JobHandler, JobQueue, TokenIssuer, WS_QUEUE_SIZE};
use mesh_storage::{KvStore, WifiSettings};
use mesh_topology::{NodeIdentity, TopologyConfig, TopologyHandle, TopologyManager};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, UdpSocket};
use tokio::task::JoinHandle;

/// A running node
pub struct Node {
    router: Arc<MessageRouter>,
    local_addr: SocketAddr,
    tasks: Vec<JoinHandle<()>>,
}

impl Node {
    /// Build the node, decide its role and start its tasks
    pub async fn start(config: &NodeConfig, kv: Arc<dyn KvStore>) -> Result<Self> {
        let identity = NodeIdentity::from_device_name(&config.node.device_name)?;
        let esp_id = identity.get();

        let defaults = WifiSettings {
            ssid: config.wifi.ssid.clone(),
            password: config.wifi.password.clone(),
            auto_connect: config.wifi.auto_connect,
        };
        WifiSettings::seed(kv.as_ref(), &defaults).await?;

        let wifi = Arc::new(SimWifi::new(esp_id));
        let bms: Option<Arc<dyn Bms>> = if config.node.receiver {
            None
        } else {
            Some(Arc::new(SimBms::new(identity.device_name())))
        };
        let radio: Option<Arc<dyn Radio>> = if config.lora.enabled {
            Some(Arc::new(SimRadio::default()))
        } else {
            None
        };

        let (queue, worker) = JobQueue::new(WS_QUEUE_SIZE, config.timers.job_pace);
        let registry = Arc::new(ConnectionRegistry::default());

        let peer = HttpRootPeer::new(
            config.node.root_addr,
            config.node.root_port,
            config.wifi.login_email.clone(),
            config.wifi.login_password.clone(),
        )?;
        let manager = TopologyManager::new(
            wifi.clone(),
            Arc::new(peer),
            TopologyHandle::new(),
            TopologyConfig {
                receiver: config.node.receiver,
                ..Default::default()
            },
        );

        let mut tasks = Vec::new();
        let dns_socket = if config.node.dns_port == 0 {
            None
        } else {
            let addr = SocketAddr::from((config.node.bind_addr, config.node.dns_port));
            match UdpSocket::bind(addr).await {
                Ok(socket) => Some(Arc::new(socket)),
                Err(e) => {
                    component_warn!("dns", "Captive DNS disabled, cannot bind {}: {}", addr, e);
                    None
                }
            }
        };
        let dns_sink = dns_socket
            .clone()
            .map(|socket| Arc::new(dns::UdpResponder::new(socket)) as Arc<dyn DatagramSink>);

        let state_of_charge = match &bms {
            Some(bms) => u16::from(bms.snapshot().await?.q),
            None => 0,
        };

        let router = Arc::new(MessageRouter::new(
            NodeContext {
                identity,
                topology: Arc::new(manager),
                tokens: Arc::new(TokenIssuer::default()),
                kv,
                wifi,
                bms,
                radio,
                clients: registry.clone(),
                cloud: Arc::new(WsConnector::new("cloud", queue.clone())),
                root: Arc::new(WsConnector::new("root", queue.clone())),
                dns: dns_sink,
            },
            RouterConfig {
                receiver: config.node.receiver,
                cloud_uri: config.cloud.uri(),
                root_addr: config.node.root_addr,
                root_port: config.node.root_port,
                ..Default::default()
            },
        ));

        let role = router.manager().boot(esp_id, state_of_charge).await?;
        component_info!("topology", "Node {} booted as {}", esp_id, role);

        let addr = SocketAddr::from((config.node.bind_addr, config.node.http_port));
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        component_info!("server", "Listening on {}", local_addr);
        tasks.push(net::spawn_server(listener, router.clone(), registry));

        if let Some(socket) = dns_socket {
            tasks.push(dns::spawn_listener(socket, queue.clone()));
        }

        let handler: Arc<dyn JobHandler> = router.clone();
        tasks.push(tokio::spawn(worker.run(handler)));

        let timers = &config.timers;
        tasks.push(spawn_periodic("read-data", queue.clone(), timers.read_data, || {
            Job::UpdateTelemetry
        }));
        tasks.push(spawn_periodic("send-data", queue.clone(), timers.send_data, || {
            Job::SendTelemetry
        }));
        tasks.push(spawn_periodic(
            "mesh-connect",
            queue.clone(),
            timers.mesh_connect,
            || Job::MeshConnect,
        ));
        tasks.push(spawn_periodic("mesh-relay", queue.clone(), timers.mesh_relay, || {
            Job::MeshRelaySend
        }));
        tasks.push(spawn_periodic("merge", queue.clone(), timers.merge, || {
            Job::MergeCheck
        }));
        if config.lora.enabled {
            tasks.push(spawn_periodic(
                "lora-transmit",
                queue.clone(),
                config.lora_transmit_interval(),
                || Job::LoraTransmit,
            ));
            tasks.push(spawn_periodic(
                "lora-receive",
                queue,
                timers.lora_receive,
                || Job::LoraReceive,
            ));
        }

        Ok(Self {
            router,
            local_addr,
            tasks,
        })
    }

    /// Topology status of this node
    pub fn topology(&self) -> &TopologyHandle {
        self.router.topology()
    }

    /// Address the HTTP and WebSocket server listens on
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    #[cfg(test)]
    pub(crate) fn router(&self) -> &Arc<MessageRouter> {
        &self.router
    }

    /// Abort every task of this node, closing its open connections
    pub fn shutdown(self) {
        for task in &self.tasks {
            task.abort();
        }
        component_info!("node", "Node {} stopped", self.router.identity().get());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use mesh_storage::MemoryKvStore;
    use mesh_topology::TopologyState;
    use std::net::Ipv4Addr;
    use std::time::Duration;
    use tokio::time::{sleep, timeout};
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::{Error as WsError, Message};

    fn local_config() -> NodeConfig {
        let mut config = NodeConfig::default();
        config.node.device_name = "bms_04".into();
        config.node.bind_addr = Ipv4Addr::LOCALHOST;
        config.node.http_port = 0;
        config.node.dns_port = 0;
        config
    }

    #[tokio::test]
    async fn test_lone_node_starts_as_root() {
        let node = Node::start(&local_config(), Arc::new(MemoryKvStore::new()))
            .await
            .unwrap();
        assert_eq!(node.topology().state(), TopologyState::StandaloneRoot);
        node.shutdown();
    }

    #[tokio::test]
    async fn test_bad_device_name_rejected() {
        let mut config = local_config();
        config.node.device_name = "battery".into();
        assert!(Node::start(&config, Arc::new(MemoryKvStore::new())).await.is_err());
    }

    async fn browser_count(node: &Node) -> usize {
        node.router().clients().browsers().await.len()
    }

    #[tokio::test]
    async fn test_shutdown_closes_open_websockets() {
        let node = Node::start(&local_config(), Arc::new(MemoryKvStore::new()))
            .await
            .unwrap();
        let token = node.router().issue_token().await;
        let url = format!("ws://{}/browser_ws?auth_token={}", node.local_addr(), token);
        let (mut ws, _) = connect_async(url).await.unwrap();
        for _ in 0..100 {
            if browser_count(&node).await == 1 {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(browser_count(&node).await, 1);

        let router = node.router().clone();
        node.shutdown();

        loop {
            let frame = timeout(Duration::from_secs(2), ws.next())
                .await
                .expect("socket still open after shutdown");
            match frame {
                Some(Ok(Message::Text(_))) => continue,
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => continue,
            }
        }
        for _ in 0..100 {
            if Arc::strong_count(&router) == 1 {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(Arc::strong_count(&router), 1);
    }

    #[tokio::test]
    async fn test_bad_or_reused_token_refused_at_upgrade() {
        let node = Node::start(&local_config(), Arc::new(MemoryKvStore::new()))
            .await
            .unwrap();
        let addr = node.local_addr();

        let bad = connect_async(format!("ws://{}/browser_ws?auth_token=nope", addr)).await;
        match bad {
            Err(WsError::Http(response)) => assert_eq!(response.status(), 401),
            other => panic!("expected 401, got {:?}", other.map(|_| ())),
        }

        let token = node.router().issue_token().await;
        let url = format!("ws://{}/browser_ws?auth_token={}", addr, token);
        let (_first, _) = connect_async(url.clone()).await.unwrap();
        match connect_async(url).await {
            Err(WsError::Http(response)) => assert_eq!(response.status(), 401),
            other => panic!("expected 401, got {:?}", other.map(|_| ())),
        }
        node.shutdown();
    }
}
