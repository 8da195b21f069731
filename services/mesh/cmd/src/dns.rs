//! Captive DNS listener.
//!
//! Queries are handed to the worker as [`Job::DnsRespond`]; the answer goes
//! back out through [`UdpResponder`].

use async_trait::async_trait;
use bytes::Bytes;
use mesh_routing::{DatagramSink, RouterError};
use mesh_session::{DnsQuery, Job, JobQueue, SessionError};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Largest DNS datagram read
pub const DNS_BUFFER_LEN: usize = 512;

/// Sends answers from the listening socket
pub struct UdpResponder {
    socket: Arc<UdpSocket>,
}

impl UdpResponder {
    /// Answer from `socket`
    pub fn new(socket: Arc<UdpSocket>) -> Self {
        Self { socket }
    }
}

#[async_trait]
impl DatagramSink for UdpResponder {
    async fn send_to(&self, payload: Bytes, target: SocketAddr) -> Result<(), RouterError> {
        self.socket
            .send_to(&payload, target)
            .await
            .map_err(|e| RouterError::Transient(format!("DNS send to {}: {}", target, e)))?;
        Ok(())
    }
}

/// Read queries and submit them until the queue closes
pub fn spawn_listener(socket: Arc<UdpSocket>, queue: JobQueue) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = [0u8; DNS_BUFFER_LEN];
        loop {
            let (len, source) = match socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    warn!("DNS receive failed: {}", e);
                    continue;
                }
            };
            debug!("DNS query of {} bytes from {}", len, source);

            let query = DnsQuery {
                payload: Bytes::copy_from_slice(&buf[..len]),
                source,
            };
            match queue.submit(Job::DnsRespond(query)) {
                Ok(()) | Err(SessionError::QueueFull(_)) => {}
                Err(_) => break,
            }
        }
    })
}
