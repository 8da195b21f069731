//! Packed radio packet layouts.
//!
//! Every packet starts with its one byte [`PacketType`]. Fields are fixed
//! width, little-endian and unpadded; the byte offsets below are the wire
//! contract between nodes and must not move.
//!
//! ```text
//! Data (53B):     type esp_id t:f32 d:i32 lat:f32 lon:f32 Q H V V1..V4:u16
//!                 I:i8 I1..I4:i16 aT cT T1..T4 OTC:i16 wifi:bool
//! Query (3B):     type esp_id query:i8
//! Request (40B):  type esp_id request:i8 new_esp_id OTC:i16 ssid[16]
//!                 password[16] auto_connect:bool success:bool
//! Response (40B): Request layout with type = Response
//! ```

use crate::WireError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Encoded size of a data packet
pub const DATA_PACKET_LEN: usize = 53;
/// Encoded size of a query packet
pub const QUERY_PACKET_LEN: usize = 3;
/// Encoded size of a request or response packet
pub const REQUEST_PACKET_LEN: usize = 40;
/// Width of the ssid and password fields
pub const CREDENTIAL_LEN: usize = 16;
/// Query code for "are you still there?"
pub const QUERY_STILL_THERE: i8 = 1;

/// Radio packet types
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PacketType {
    /// Telemetry snapshot
    Data = 0,
    /// Liveness check
    Query = 1,
    /// Command request
    Request = 2,
    /// Command response (request layout with success set)
    Response = 3,
}

impl TryFrom<u8> for PacketType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PacketType::Data),
            1 => Ok(PacketType::Query),
            2 => Ok(PacketType::Request),
            3 => Ok(PacketType::Response),
            _ => Err(WireError::Type(value)),
        }
    }
}

/// Command carried by a request packet
#[repr(i8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RequestKind {
    /// No command
    #[default]
    NoRequest = 0,
    /// Rename the node and/or change the over-temperature threshold
    ChangeSettings = 1,
    /// Join a home WiFi network
    ConnectWifi = 2,
    /// Reset the BMS
    ResetBms = 3,
    /// Unseal the BMS
    UnsealBms = 4,
}

impl RequestKind {
    /// The `content.summary` string used in WebSocket JSON
    pub fn summary(&self) -> Option<&'static str> {
        match self {
            RequestKind::NoRequest => None,
            RequestKind::ChangeSettings => Some("change-settings"),
            RequestKind::ConnectWifi => Some("connect-wifi"),
            RequestKind::ResetBms => Some("reset-bms"),
            RequestKind::UnsealBms => Some("unseal-bms"),
        }
    }

    /// Look up a request kind by its summary string
    pub fn from_summary(summary: &str) -> Option<Self> {
        match summary {
            "change-settings" => Some(RequestKind::ChangeSettings),
            "connect-wifi" => Some(RequestKind::ConnectWifi),
            "reset-bms" => Some(RequestKind::ResetBms),
            "unseal-bms" => Some(RequestKind::UnsealBms),
            _ => None,
        }
    }
}

impl TryFrom<i8> for RequestKind {
    type Error = WireError;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(RequestKind::NoRequest),
            1 => Ok(RequestKind::ChangeSettings),
            2 => Ok(RequestKind::ConnectWifi),
            3 => Ok(RequestKind::ResetBms),
            4 => Ok(RequestKind::UnsealBms),
            _ => Err(WireError::Code(value as u8)),
        }
    }
}

/// Telemetry, position and wifi status of one node
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DataPacket {
    /// Sending node
    pub esp_id: u8,
    /// UTC time of day as `hhmmss`
    pub time: f32,
    /// Date as `ddmmyy`
    pub date: i32,
    /// Latitude
    pub lat: f32,
    /// Longitude
    pub lon: f32,
    /// Relative state of charge
    pub q: u8,
    /// State of health
    pub h: u8,
    /// Pack voltage
    pub v: u8,
    /// Cell voltages
    pub v_cells: [u16; 4],
    /// Pack current
    pub i: i8,
    /// Cell currents
    pub i_cells: [i16; 4],
    /// Ambient temperature
    pub a_t: i16,
    /// Cell temperature
    pub c_t: i16,
    /// Per-cell temperatures
    pub t_cells: [i16; 4],
    /// Over-temperature charge threshold
    pub otc: i16,
    /// Node is attached to home WiFi
    pub wifi: bool,
}

impl DataPacket {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(PacketType::Data as u8);
        buf.put_u8(self.esp_id);
        buf.put_f32_le(self.time);
        buf.put_i32_le(self.date);
        buf.put_f32_le(self.lat);
        buf.put_f32_le(self.lon);
        buf.put_u8(self.q);
        buf.put_u8(self.h);
        buf.put_u8(self.v);
        for v in self.v_cells {
            buf.put_u16_le(v);
        }
        buf.put_i8(self.i);
        for i in self.i_cells {
            buf.put_i16_le(i);
        }
        buf.put_i16_le(self.a_t);
        buf.put_i16_le(self.c_t);
        for t in self.t_cells {
            buf.put_i16_le(t);
        }
        buf.put_i16_le(self.otc);
        buf.put_u8(self.wifi as u8);
    }

    fn decode(buf: &mut Bytes) -> Self {
        let esp_id = buf.get_u8();
        let time = buf.get_f32_le();
        let date = buf.get_i32_le();
        let lat = buf.get_f32_le();
        let lon = buf.get_f32_le();
        let q = buf.get_u8();
        let h = buf.get_u8();
        let v = buf.get_u8();
        let mut v_cells = [0u16; 4];
        for v in v_cells.iter_mut() {
            *v = buf.get_u16_le();
        }
        let i = buf.get_i8();
        let mut i_cells = [0i16; 4];
        for i in i_cells.iter_mut() {
            *i = buf.get_i16_le();
        }
        let a_t = buf.get_i16_le();
        let c_t = buf.get_i16_le();
        let mut t_cells = [0i16; 4];
        for t in t_cells.iter_mut() {
            *t = buf.get_i16_le();
        }
        let otc = buf.get_i16_le();
        let wifi = buf.get_u8() != 0;

        Self {
            esp_id,
            time,
            date,
            lat,
            lon,
            q,
            h,
            v,
            v_cells,
            i,
            i_cells,
            a_t,
            c_t,
            t_cells,
            otc,
            wifi,
        }
    }
}

/// Liveness check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueryPacket {
    /// Sending node
    pub esp_id: u8,
    /// Query code, [`QUERY_STILL_THERE`] for a liveness check
    pub query: i8,
}

/// Command request, or its echoed response
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RequestPacket {
    /// Target (request) or answering (response) node
    pub esp_id: u8,
    /// Command
    pub kind: RequestKind,
    /// New node id for change-settings
    pub new_esp_id: u8,
    /// New over-temperature threshold for change-settings
    pub otc: i16,
    /// NUL padded ssid for connect-wifi
    pub ssid: [u8; CREDENTIAL_LEN],
    /// NUL padded password for connect-wifi
    pub password: [u8; CREDENTIAL_LEN],
    /// Persist auto-connect for connect-wifi
    pub auto_connect: bool,
    /// Set on responses when the command succeeded
    pub success: bool,
}

impl RequestPacket {
    /// Set the ssid, truncated to the field width
    pub fn set_ssid(&mut self, ssid: &str) {
        self.ssid = pack_str(ssid);
    }

    /// Set the password, truncated to the field width
    pub fn set_password(&mut self, password: &str) {
        self.password = pack_str(password);
    }

    /// The ssid up to the first NUL
    pub fn ssid_str(&self) -> String {
        unpack_str(&self.ssid)
    }

    /// The password up to the first NUL
    pub fn password_str(&self) -> String {
        unpack_str(&self.password)
    }

    fn encode(&self, typ: PacketType, buf: &mut BytesMut) {
        buf.put_u8(typ as u8);
        buf.put_u8(self.esp_id);
        buf.put_i8(self.kind as i8);
        buf.put_u8(self.new_esp_id);
        buf.put_i16_le(self.otc);
        buf.put_slice(&self.ssid);
        buf.put_slice(&self.password);
        buf.put_u8(self.auto_connect as u8);
        buf.put_u8(self.success as u8);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        let esp_id = buf.get_u8();
        let kind = RequestKind::try_from(buf.get_i8())?;
        let new_esp_id = buf.get_u8();
        let otc = buf.get_i16_le();
        let mut ssid = [0u8; CREDENTIAL_LEN];
        buf.copy_to_slice(&mut ssid);
        let mut password = [0u8; CREDENTIAL_LEN];
        buf.copy_to_slice(&mut password);
        let auto_connect = buf.get_u8() != 0;
        let success = buf.get_u8() != 0;

        Ok(Self {
            esp_id,
            kind,
            new_esp_id,
            otc,
            ssid,
            password,
            auto_connect,
            success,
        })
    }
}

/// A decoded radio payload
#[derive(Debug, Clone, PartialEq)]
pub enum RadioPacket {
    /// Telemetry snapshot
    Data(DataPacket),
    /// Liveness check
    Query(QueryPacket),
    /// Command request
    Request(RequestPacket),
    /// Command response
    Response(RequestPacket),
}

impl RadioPacket {
    /// Packet type byte
    pub fn packet_type(&self) -> PacketType {
        match self {
            RadioPacket::Data(_) => PacketType::Data,
            RadioPacket::Query(_) => PacketType::Query,
            RadioPacket::Request(_) => PacketType::Request,
            RadioPacket::Response(_) => PacketType::Response,
        }
    }

    /// Node id carried in the packet
    pub fn esp_id(&self) -> u8 {
        match self {
            RadioPacket::Data(p) => p.esp_id,
            RadioPacket::Query(p) => p.esp_id,
            RadioPacket::Request(p) | RadioPacket::Response(p) => p.esp_id,
        }
    }

    /// Encoded size of this packet
    pub fn encoded_len(&self) -> usize {
        encoded_len(self.packet_type())
    }

    /// Encode to the packed little-endian layout
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        match self {
            RadioPacket::Data(p) => p.encode(&mut buf),
            RadioPacket::Query(p) => {
                buf.put_u8(PacketType::Query as u8);
                buf.put_u8(p.esp_id);
                buf.put_i8(p.query);
            }
            RadioPacket::Request(p) => p.encode(PacketType::Request, &mut buf),
            RadioPacket::Response(p) => p.encode(PacketType::Response, &mut buf),
        }
        buf.freeze()
    }

    /// Decode a packed payload
    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        let Some(&first) = payload.first() else {
            return Err(WireError::Incomplete);
        };
        let typ = PacketType::try_from(first)?;

        let expected = encoded_len(typ);
        if payload.len() < expected {
            return Err(WireError::Incomplete);
        }
        if payload.len() > expected {
            return Err(WireError::Size(payload.len()));
        }

        let mut buf = Bytes::copy_from_slice(&payload[1..]);
        let packet = match typ {
            PacketType::Data => RadioPacket::Data(DataPacket::decode(&mut buf)),
            PacketType::Query => RadioPacket::Query(QueryPacket {
                esp_id: buf.get_u8(),
                query: buf.get_i8(),
            }),
            PacketType::Request => RadioPacket::Request(RequestPacket::decode(&mut buf)?),
            PacketType::Response => RadioPacket::Response(RequestPacket::decode(&mut buf)?),
        };
        Ok(packet)
    }
}

/// Encoded size of a packet type
pub fn encoded_len(typ: PacketType) -> usize {
    match typ {
        PacketType::Data => DATA_PACKET_LEN,
        PacketType::Query => QUERY_PACKET_LEN,
        PacketType::Request | PacketType::Response => REQUEST_PACKET_LEN,
    }
}

fn pack_str(value: &str) -> [u8; CREDENTIAL_LEN] {
    let mut out = [0u8; CREDENTIAL_LEN];
    let mut end = value.len().min(CREDENTIAL_LEN);
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    out[..end].copy_from_slice(&value.as_bytes()[..end]);
    out
}

fn unpack_str(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}
