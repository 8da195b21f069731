//! Units of deferred work.

use bytes::Bytes;
use std::fmt;
use std::net::SocketAddr;

/// A captive-portal DNS query waiting for an answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsQuery {
    /// Raw query datagram
    pub payload: Bytes,
    /// Where the answer goes
    pub source: SocketAddr,
}

/// Work item consumed exactly once by the worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    /// Refresh cached telemetry from the BMS
    UpdateTelemetry,
    /// Broadcast telemetry to browsers and the cloud
    SendTelemetry,
    /// Try to (re)connect a child to its root
    MeshConnect,
    /// Relay local telemetry to the root
    MeshRelaySend,
    /// Look for a competing root
    MergeCheck,
    /// Answer a DNS query
    DnsRespond(DnsQuery),
    /// Message received on an outbound WebSocket link
    WebsocketReceive(String),
    /// Radio transmit slot
    LoraTransmit,
    /// Poll the radio for a frame
    LoraReceive,
}

/// Payload-free tag of a [`Job`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    /// [`Job::UpdateTelemetry`]
    UpdateTelemetry,
    /// [`Job::SendTelemetry`]
    SendTelemetry,
    /// [`Job::MeshConnect`]
    MeshConnect,
    /// [`Job::MeshRelaySend`]
    MeshRelaySend,
    /// [`Job::MergeCheck`]
    MergeCheck,
    /// [`Job::DnsRespond`]
    DnsRespond,
    /// [`Job::WebsocketReceive`]
    WebsocketReceive,
    /// [`Job::LoraTransmit`]
    LoraTransmit,
    /// [`Job::LoraReceive`]
    LoraReceive,
}

impl JobKind {
    /// Stable name for logs
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::UpdateTelemetry => "update_telemetry",
            JobKind::SendTelemetry => "send_telemetry",
            JobKind::MeshConnect => "mesh_connect",
            JobKind::MeshRelaySend => "mesh_relay_send",
            JobKind::MergeCheck => "merge_check",
            JobKind::DnsRespond => "dns_respond",
            JobKind::WebsocketReceive => "websocket_receive",
            JobKind::LoraTransmit => "lora_transmit",
            JobKind::LoraReceive => "lora_receive",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Job {
    /// Tag of this job
    pub fn kind(&self) -> JobKind {
        match self {
            Job::UpdateTelemetry => JobKind::UpdateTelemetry,
            Job::SendTelemetry => JobKind::SendTelemetry,
            Job::MeshConnect => JobKind::MeshConnect,
            Job::MeshRelaySend => JobKind::MeshRelaySend,
            Job::MergeCheck => JobKind::MergeCheck,
            Job::DnsRespond(_) => JobKind::DnsRespond,
            Job::WebsocketReceive(_) => JobKind::WebsocketReceive,
            Job::LoraTransmit => JobKind::LoraTransmit,
            Job::LoraReceive => JobKind::LoraReceive,
        }
    }
}
