//! Collaborators the router drives: the BMS, the radio, connected clients
//! and the outbound WebSocket links.

use crate::{RouterError, TelemetrySnapshot};
use async_trait::async_trait;
use bytes::Bytes;
use mesh_session::ConnectionId;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Battery management chip
#[async_trait]
pub trait Bms: Send + Sync {
    /// Read a full telemetry snapshot
    async fn snapshot(&self) -> Result<TelemetrySnapshot, RouterError>;
    /// Reset the chip
    async fn reset(&self) -> Result<(), RouterError>;
    /// Unseal the data flash
    async fn unseal(&self) -> Result<(), RouterError>;
    /// Seal the data flash
    async fn seal(&self) -> Result<(), RouterError>;
    /// Read the overtemperature charge threshold
    async fn read_otc(&self) -> Result<i16, RouterError>;
    /// Write the overtemperature charge threshold
    async fn write_otc(&self, otc: i16) -> Result<(), RouterError>;
    /// Write the device name the node id is derived from
    async fn write_device_name(&self, name: &str) -> Result<(), RouterError>;
}

/// BMS behind the shared bus lock.
///
/// Manual commands and periodic reads take the same lock, so a command is
/// never interleaved with a telemetry read.
pub struct SharedBms {
    bms: Arc<dyn Bms>,
    bus: Mutex<()>,
    latest: RwLock<Option<TelemetrySnapshot>>,
}

impl SharedBms {
    /// Wrap a BMS
    pub fn new(bms: Arc<dyn Bms>) -> Self {
        Self {
            bms,
            bus: Mutex::new(()),
            latest: RwLock::new(None),
        }
    }

    /// Read a fresh snapshot and keep it as the latest
    pub async fn refresh(&self) -> Result<TelemetrySnapshot, RouterError> {
        let snapshot = {
            let _bus = self.bus.lock().await;
            self.bms.snapshot().await?
        };
        *self.latest.write().await = Some(snapshot.clone());
        Ok(snapshot)
    }

    /// Latest snapshot, reading one if none is held yet
    pub async fn latest(&self) -> Result<TelemetrySnapshot, RouterError> {
        if let Some(snapshot) = self.latest.read().await.clone() {
            return Ok(snapshot);
        }
        self.refresh().await
    }

    /// Reset the chip
    pub async fn reset(&self) -> Result<(), RouterError> {
        let _bus = self.bus.lock().await;
        info!("Resetting BMS");
        self.bms.reset().await
    }

    /// Unseal the data flash
    pub async fn unseal(&self) -> Result<(), RouterError> {
        let _bus = self.bus.lock().await;
        info!("Unsealing BMS");
        self.bms.unseal().await
    }

    /// Write a new device name
    pub async fn rename(&self, name: &str) -> Result<(), RouterError> {
        let _bus = self.bus.lock().await;
        info!("Changing device name to {}", name);
        self.bms.write_device_name(name).await
    }

    /// Write the threshold if it differs from the stored one; true if written
    pub async fn update_otc(&self, otc: i16) -> Result<bool, RouterError> {
        let _bus = self.bus.lock().await;
        if self.bms.read_otc().await? == otc {
            return Ok(false);
        }
        info!("Changing OTC threshold to {}", otc);
        self.bms.write_otc(otc).await?;
        Ok(true)
    }
}

/// LoRa radio
#[async_trait]
pub trait Radio: Send + Sync {
    /// Transmit one framed packet
    async fn transmit_raw(&self, frame: Bytes) -> Result<(), RouterError>;
    /// Bytes received since the last call, if any
    async fn receive_raw(&self) -> Result<Option<Bytes>, RouterError>;
}

/// Accepted WebSocket connections
#[async_trait]
pub trait ClientSink: Send + Sync {
    /// Send a text frame to a connection
    async fn send(&self, connection: ConnectionId, text: &str) -> Result<(), RouterError>;
}

/// Sender for captive DNS answers
#[async_trait]
pub trait DatagramSink: Send + Sync {
    /// Send a datagram
    async fn send_to(&self, payload: Bytes, target: SocketAddr) -> Result<(), RouterError>;
}

/// An open outbound WebSocket
#[async_trait]
pub trait LinkSession: Send + Sync {
    /// Whether the connection is still up
    fn is_connected(&self) -> bool;
    /// Send a text frame
    async fn send(&self, text: &str) -> Result<(), RouterError>;
}

/// Opens outbound WebSockets
#[async_trait]
pub trait LinkConnector: Send + Sync {
    /// Connect to `uri`
    async fn connect(&self, uri: &str) -> Result<Box<dyn LinkSession>, RouterError>;
}

/// Result of a send over a [`LazyLink`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkSend {
    /// Message written
    Sent,
    /// Link was down; it has been torn down and the message skipped
    Skipped,
}

/// Outbound WebSocket opened on demand.
///
/// The session is created on first use and dropped as soon as it is found
/// disconnected; the next send then reconnects. This backs both the cloud
/// link and a child's link to its root.
pub struct LazyLink {
    name: &'static str,
    connector: Arc<dyn LinkConnector>,
    connect_timeout: Duration,
    session: Mutex<Option<(String, Box<dyn LinkSession>)>>,
}

impl LazyLink {
    /// Create a closed link
    pub fn new(name: &'static str, connector: Arc<dyn LinkConnector>, connect_timeout: Duration) -> Self {
        Self {
            name,
            connector,
            connect_timeout,
            session: Mutex::new(None),
        }
    }

    /// Open the link to `uri` if needed; true when it is up
    pub async fn ensure(&self, uri: &str) -> Result<bool, RouterError> {
        let mut session = self.session.lock().await;
        self.ensure_locked(&mut session, uri).await
    }

    /// Send over the link, opening it to `uri` first if needed
    pub async fn send(&self, uri: &str, text: &str) -> Result<LinkSend, RouterError> {
        let mut session = self.session.lock().await;
        if !self.ensure_locked(&mut session, uri).await? {
            return Ok(LinkSend::Skipped);
        }
        match session.as_ref() {
            Some((_, link)) => {
                debug!("Sending on {} link: {}", self.name, text);
                link.send(text).await?;
                Ok(LinkSend::Sent)
            }
            None => Ok(LinkSend::Skipped),
        }
    }

    /// Send over the link only if it is already up
    pub async fn send_if_open(&self, text: &str) -> Result<LinkSend, RouterError> {
        let session = self.session.lock().await;
        match session.as_ref() {
            Some((_, link)) if link.is_connected() => {
                link.send(text).await?;
                Ok(LinkSend::Sent)
            }
            _ => {
                warn!("{} link not connected, dropping message", self.name);
                Ok(LinkSend::Skipped)
            }
        }
    }

    /// Whether a session is held and connected
    pub async fn is_open(&self) -> bool {
        matches!(self.session.lock().await.as_ref(), Some((_, link)) if link.is_connected())
    }

    /// Drop the session
    pub async fn close(&self) {
        if self.session.lock().await.take().is_some() {
            info!("Closed {} link", self.name);
        }
    }

    async fn ensure_locked(
        &self,
        session: &mut Option<(String, Box<dyn LinkSession>)>,
        uri: &str,
    ) -> Result<bool, RouterError> {
        let held = session
            .as_ref()
            .map(|(current, link)| (current == uri, link.is_connected()));
        match held {
            Some((true, true)) => return Ok(true),
            Some((_, connected)) => {
                if connected {
                    debug!("{} link target changed to {}", self.name, uri);
                } else {
                    info!("{} link disconnected, tearing down", self.name);
                }
                *session = None;
                // reconnect on the next cycle
                return Ok(false);
            }
            None => {}
        }

        let connect = tokio::time::timeout(self.connect_timeout, self.connector.connect(uri));
        match connect.await {
            Ok(Ok(link)) => {
                info!("Opened {} link to {}", self.name, uri);
                *session = Some((uri.to_string(), link));
                Ok(true)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(RouterError::Transient(format!(
                "{} link connect timed out after {:?}",
                self.name, self.connect_timeout
            ))),
        }
    }
}
