//! LoRa link layer for the battery-monitoring mesh.
//!
//! This crate holds everything that touches radio bytes: the byte-stuffed
//! frame codec, the packed packet layouts, conversion between those packets
//! and the WebSocket JSON messages, and airtime pacing.
//!
//! ## Wire Format
//!
//! ```text
//! +------+--------------------------------+------+
//! | 0x7E | escaped packet (type byte 1st) | 0x7E |
//! +------+--------------------------------+------+
//!          0x7E -> 0x7D 0x5E
//!          0x7D -> 0x7D 0x5D
//! ```
//!
//! A frame never exceeds [`LORA_MAX_PACKET_LEN`] bytes on air.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod airtime;
pub mod error;
pub mod frame;
pub mod json;
pub mod packet;

// Re-export main types
pub use airtime::{
    low_data_rate_optimisation_required, payload_symbols, symbol_duration_ms, time_on_air_ms,
    transmission_delay_ms, LoraParams,
};
pub use error::WireError;
pub use frame::{
    decode, encode, max_encoded_len, FrameDecoder, ESC_END, ESC_ESC, FRAME_END, FRAME_ESC,
    LORA_MAX_PACKET_LEN,
};
pub use json::{packet_from_json, packet_to_json, STILL_THERE};
pub use packet::{
    DataPacket, PacketType, QueryPacket, RadioPacket, RequestKind, RequestPacket,
    CREDENTIAL_LEN, DATA_PACKET_LEN, QUERY_PACKET_LEN, QUERY_STILL_THERE, REQUEST_PACKET_LEN,
};
