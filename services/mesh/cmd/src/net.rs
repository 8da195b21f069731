//! Host network adapters.
//!
//! One TCP listener serves both the WebSocket upgrades and the three JSON
//! endpoints other roots call. Outbound links to the cloud and to a root
//! use the same WebSocket stack, and the root endpoints are called with
//! `reqwest`.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use mesh_routing::{ClientSink, LinkConnector, LinkSession, MessageRouter, RouterError};
use mesh_session::{ConnectionId, Job, JobQueue, PeerKind, SessionError};
use mesh_topology::{
    RootPeer, TopologyError, WifiEvent, LOGIN_PATH, NUM_CLIENTS_PATH, YIELD_PATH,
};
use serde_json::{json, Value};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

/// Bytes peeked to tell an upgrade from a plain request
const PEEK_LEN: usize = 1024;

/// Largest request body accepted on the JSON endpoints
const MAX_BODY_LEN: usize = 1024;

/// Writers of the accepted WebSocket connections
#[derive(Default)]
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    writers: DashMap<ConnectionId, mpsc::UnboundedSender<Message>>,
}

impl ConnectionRegistry {
    fn allocate(&self) -> ConnectionId {
        ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

#[async_trait]
impl ClientSink for ConnectionRegistry {
    async fn send(&self, connection: ConnectionId, text: &str) -> Result<(), RouterError> {
        let writer = self
            .writers
            .get(&connection)
            .ok_or_else(|| RouterError::Transient(format!("{} is closed", connection)))?;
        writer
            .send(Message::Text(text.to_string().into()))
            .map_err(|_| RouterError::Transient(format!("{} writer stopped", connection)))
    }
}

/// Accept connections until the task is aborted.
///
/// Connection tasks live in a `JoinSet` owned by the accept loop, so
/// aborting the returned handle closes every socket this server opened.
pub fn spawn_server(
    listener: TcpListener,
    router: Arc<MessageRouter>,
    registry: Arc<ConnectionRegistry>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!("Accepted TCP connection from {}", peer);
                        let router = router.clone();
                        let registry = registry.clone();
                        connections.spawn(async move {
                            if let Err(e) = handle_connection(stream, router, registry).await {
                                debug!("Connection from {} ended: {}", peer, e);
                            }
                        });
                    }
                    Err(e) => {
                        warn!("Accept failed: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }
    })
}

async fn handle_connection(
    stream: TcpStream,
    router: Arc<MessageRouter>,
    registry: Arc<ConnectionRegistry>,
) -> anyhow::Result<()> {
    let mut head = [0u8; PEEK_LEN];
    let n = stream.peek(&mut head).await?;
    let head = &head[..n];
    match request_target(head) {
        Some(target) if is_upgrade(head) => {
            serve_websocket(stream, target, router, registry).await
        }
        _ => serve_http(stream, router).await,
    }
}

fn is_upgrade(head: &[u8]) -> bool {
    String::from_utf8_lossy(head)
        .to_ascii_lowercase()
        .contains("upgrade: websocket")
}

/// Path and query of the request line
fn request_target(head: &[u8]) -> Option<String> {
    let head = String::from_utf8_lossy(head);
    let line = head.lines().next()?;
    let mut parts = line.split_whitespace();
    let _method = parts.next()?;
    let target = parts.next()?;
    parts.next()?;
    Some(target.to_string())
}

fn rejection(error: &RouterError) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(error.to_string()));
    *response.status_mut() = match error {
        RouterError::CapacityExceeded => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::UNAUTHORIZED,
    };
    response
}

async fn serve_websocket(
    stream: TcpStream,
    uri: String,
    router: Arc<MessageRouter>,
    registry: Arc<ConnectionRegistry>,
) -> anyhow::Result<()> {
    // the token is redeemed before the upgrade answer goes out
    let connection = registry.allocate();
    let admitted = router.on_handshake(connection, &uri).await;
    let refusal = admitted.as_ref().err().map(rejection);

    let check = |_: &Request, response: Response| -> Result<Response, ErrorResponse> {
        match refusal {
            Some(refusal) => Err(refusal),
            None => Ok(response),
        }
    };
    let upgraded = accept_hdr_async(stream, check).await;

    let (kind, ws) = match (admitted, upgraded) {
        (Ok(kind), Ok(ws)) => (kind, ws),
        (Err(e), _) => {
            warn!("Rejected WebSocket {}: {}", uri, e);
            return Ok(());
        }
        (Ok(_), Err(e)) => {
            router.on_disconnect(connection).await;
            return Err(e.into());
        }
    };
    if matches!(kind, PeerKind::MeshPeer(_)) {
        router.on_wifi_event(WifiEvent::StationConnected);
    }

    let (mut write, mut read) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    registry.writers.insert(connection, tx);

    let writer = async {
        while let Some(message) = rx.recv().await {
            if write.send(message).await.is_err() {
                break;
            }
        }
    };
    let reader = async {
        while let Some(frame) = read.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    if let Err(e) = router.on_websocket_text(connection, text.as_str()).await {
                        warn!("Message from {} not handled: {}", connection, e);
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!("Read error on {}: {}", connection, e);
                    break;
                }
            }
        }
    };
    tokio::select! {
        _ = writer => {}
        _ = reader => {}
    }

    registry.writers.remove(&connection);
    router.on_disconnect(connection).await;
    if matches!(kind, PeerKind::MeshPeer(_)) {
        router.on_wifi_event(WifiEvent::StationDisconnected);
    }
    info!("WebSocket {} closed", connection);
    Ok(())
}

async fn serve_http(stream: TcpStream, router: Arc<MessageRouter>) -> anyhow::Result<()> {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();

    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 || line.trim().is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
    }
    let mut body = vec![0u8; content_length.min(MAX_BODY_LEN)];
    reader.read_exact(&mut body).await?;

    let (status, reply) = match (method.as_str(), path.as_str()) {
        ("POST", LOGIN_PATH) => {
            if let Ok(login) = serde_json::from_slice::<Value>(&body) {
                debug!("Login from {}", login["email"]);
            }
            ("200 OK", json!({ "auth_token": router.issue_token().await }))
        }
        ("GET", NUM_CLIENTS_PATH) => (
            "200 OK",
            json!({ "num_connected_clients": router.connected_stations() }),
        ),
        ("POST", YIELD_PATH) => {
            router.on_yield_request();
            ("200 OK", json!({ "status": "restarting" }))
        }
        _ => ("404 Not Found", json!({ "error": "not found" })),
    };
    debug!("{} {} -> {}", method, path, status);

    let body = reply.to_string();
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    write.write_all(response.as_bytes()).await?;
    write.shutdown().await?;
    Ok(())
}

type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

struct WsSession {
    writer: Mutex<WsWriter>,
    up: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

#[async_trait]
impl LinkSession for WsSession {
    fn is_connected(&self) -> bool {
        self.up.load(Ordering::SeqCst)
    }

    async fn send(&self, text: &str) -> Result<(), RouterError> {
        let mut writer = self.writer.lock().await;
        writer
            .send(Message::Text(text.to_string().into()))
            .await
            .map_err(|e| {
                self.up.store(false, Ordering::SeqCst);
                RouterError::Transient(e.to_string())
            })
    }
}

impl Drop for WsSession {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Opens outbound WebSockets whose inbound frames become jobs
pub struct WsConnector {
    name: &'static str,
    queue: JobQueue,
}

impl WsConnector {
    /// Create a connector submitting received text to `queue`
    pub fn new(name: &'static str, queue: JobQueue) -> Self {
        Self { name, queue }
    }
}

#[async_trait]
impl LinkConnector for WsConnector {
    async fn connect(&self, uri: &str) -> Result<Box<dyn LinkSession>, RouterError> {
        let (ws, _) = connect_async(uri)
            .await
            .map_err(|e| RouterError::Transient(format!("{} connect: {}", self.name, e)))?;
        let (writer, mut read) = ws.split();
        let up = Arc::new(AtomicBool::new(true));

        let name = self.name;
        let queue = self.queue.clone();
        let reader_up = up.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        match queue.submit(Job::WebsocketReceive(text.as_str().to_string())) {
                            Ok(()) | Err(SessionError::QueueFull(_)) => {}
                            Err(_) => break,
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!("{} link read failed: {}", name, e);
                        break;
                    }
                }
            }
            reader_up.store(false, Ordering::SeqCst);
        });

        Ok(Box::new(WsSession {
            writer: Mutex::new(writer),
            up,
            reader,
        }))
    }
}

/// Root endpoints reached over HTTP
pub struct HttpRootPeer {
    client: reqwest::Client,
    base: String,
    email: String,
    password: String,
}

impl HttpRootPeer {
    /// Create a peer for the root at `addr:port`
    pub fn new(
        addr: Ipv4Addr,
        port: u16,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base: format!("http://{}", SocketAddr::from((addr, port))),
            email: email.into(),
            password: password.into(),
        })
    }

    async fn get_json(&self, path: &str) -> Result<Value, TopologyError> {
        self.client
            .get(format!("{}{}", self.base, path))
            .send()
            .await
            .map_err(peer_error)?
            .json()
            .await
            .map_err(peer_error)
    }
}

fn peer_error(err: reqwest::Error) -> TopologyError {
    TopologyError::Peer(err.to_string())
}

#[async_trait]
impl RootPeer for HttpRootPeer {
    async fn login(&self) -> Result<String, TopologyError> {
        let reply: Value = self
            .client
            .post(format!("{}{}", self.base, LOGIN_PATH))
            .json(&json!({ "email": self.email, "password": self.password }))
            .send()
            .await
            .map_err(peer_error)?
            .json()
            .await
            .map_err(peer_error)?;

        reply
            .get("auth_token")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| TopologyError::Peer("login reply without auth_token".into()))
    }

    async fn connected_clients(&self) -> Result<usize, TopologyError> {
        let reply = self.get_json(NUM_CLIENTS_PATH).await?;
        reply
            .get("num_connected_clients")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .ok_or_else(|| TopologyError::Peer("missing num_connected_clients".into()))
    }

    async fn ask_to_yield(&self) -> Result<(), TopologyError> {
        self.client
            .post(format!("{}{}", self.base, YIELD_PATH))
            .send()
            .await
            .map_err(peer_error)?;
        Ok(())
    }
}
