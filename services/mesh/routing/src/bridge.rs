//! LoRa side of the router: framing, reassembly and the transmit backlog.

use crate::{Radio, RouterError};
use bytes::BytesMut;
use mesh_wire::{frame, FrameDecoder, RadioPacket, LORA_MAX_PACKET_LEN};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

struct Reassembly {
    decoder: FrameDecoder,
    buf: BytesMut,
}

/// Frames packets onto the radio and reassembles received bytes
pub struct RadioBridge {
    radio: Arc<dyn Radio>,
    rx: Mutex<Reassembly>,
    backlog: Mutex<VecDeque<RadioPacket>>,
}

impl RadioBridge {
    /// Create a bridge over a radio
    pub fn new(radio: Arc<dyn Radio>) -> Self {
        Self {
            radio,
            rx: Mutex::new(Reassembly {
                decoder: FrameDecoder::new(),
                buf: BytesMut::with_capacity(LORA_MAX_PACKET_LEN),
            }),
            backlog: Mutex::new(VecDeque::new()),
        }
    }

    /// Frame and transmit one packet
    pub async fn transmit(&self, packet: &RadioPacket) -> Result<(), RouterError> {
        let payload = packet.encode();
        let framed = frame::encode(&payload, LORA_MAX_PACKET_LEN)?;
        debug!(
            "Transmitting {:?} from {} ({} bytes framed)",
            packet.packet_type(),
            packet.esp_id(),
            framed.len()
        );
        self.radio.transmit_raw(framed).await
    }

    /// Buffer received bytes and return every packet they complete.
    ///
    /// Frames that fail to decode are logged and dropped.
    pub async fn feed(&self, bytes: &[u8]) -> Vec<RadioPacket> {
        let mut rx = self.rx.lock().await;
        let Reassembly { decoder, buf } = &mut *rx;
        buf.extend_from_slice(bytes);

        let mut packets = Vec::new();
        loop {
            match decoder.decode(buf) {
                Ok(Some(payload)) => match RadioPacket::decode(&payload) {
                    Ok(packet) => packets.push(packet),
                    Err(e) => warn!("Dropping radio packet: {}", e),
                },
                Ok(None) => break,
                Err(e) => warn!("Dropping radio frame: {}", e),
            }
        }
        packets
    }

    /// Poll the radio and return any completed packets
    pub async fn poll(&self) -> Result<Vec<RadioPacket>, RouterError> {
        match self.radio.receive_raw().await? {
            Some(bytes) => Ok(self.feed(&bytes).await),
            None => Ok(Vec::new()),
        }
    }

    /// Queue packets behind the current backlog
    pub async fn enqueue(&self, packets: impl IntoIterator<Item = RadioPacket>) {
        self.backlog.lock().await.extend(packets);
    }

    /// Queue a packet ahead of the current backlog
    pub async fn enqueue_first(&self, packet: RadioPacket) {
        self.backlog.lock().await.push_front(packet);
    }

    /// Next packet to transmit
    pub async fn next(&self) -> Option<RadioPacket> {
        self.backlog.lock().await.pop_front()
    }

    /// Number of packets waiting
    pub async fn backlog_len(&self) -> usize {
        self.backlog.lock().await.len()
    }
}
