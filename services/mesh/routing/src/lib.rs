//! Message routing for a bms-mesh node.
//!
//! The router accepts WebSocket clients (local browsers and mesh peers),
//! executes their requests, and bridges telemetry and commands between the
//! peer mailbox, the LoRa radio and the cloud. Collaborators it drives (the
//! BMS, the radio, the outbound links) are traits so the host binary and the
//! tests can supply their own.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bridge;
pub mod collab;
pub mod dns;
pub mod error;
pub mod request;
pub mod router;
pub mod telemetry;

// Re-export main types
pub use bridge::RadioBridge;
pub use collab::{
    Bms, ClientSink, DatagramSink, LazyLink, LinkConnector, LinkSend, LinkSession, Radio,
    SharedBms,
};
pub use dns::captive_answer;
pub use error::RouterError;
pub use request::{connect_wifi_request, RequestExecutor, RequestTiming};
pub use router::{MessageRouter, NodeContext, RouterConfig};
pub use telemetry::{data_message, scale_for_frontend, TelemetrySnapshot};
