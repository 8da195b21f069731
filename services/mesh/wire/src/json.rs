//! Conversion between WebSocket JSON messages and radio packets.
//!
//! Only message types with a packed radio layout convert; `register` and
//! anything else fail with [`WireError::Json`].

use crate::packet::{
    DataPacket, QueryPacket, RadioPacket, RequestKind, RequestPacket, QUERY_STILL_THERE,
};
use crate::WireError;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use serde_json::{json, Map, Value};

/// Liveness query text
pub const STILL_THERE: &str = "are you still there?";

/// Timestamp format carried in data messages
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Pack a timestamp into the `hhmmss` time and `ddmmyy` date fields
pub fn encode_timestamp(ts: &DateTime<Utc>) -> (f32, i32) {
    let time = ts.hour() * 10_000 + ts.minute() * 100 + ts.second();
    let date = ts.day() * 10_000 + ts.month() * 100 + (ts.year().rem_euclid(100)) as u32;
    (time as f32, date as i32)
}

/// Unpack `hhmmss` and `ddmmyy` fields, years taken as 20yy
pub fn decode_timestamp(time: f32, date: i32) -> Option<DateTime<Utc>> {
    let hhmmss = time.max(0.0).round() as u32;
    let date = u32::try_from(date).ok()?;

    let day = NaiveDate::from_ymd_opt(2000 + (date % 100) as i32, (date / 100) % 100, date / 10_000)?;
    let naive = day.and_hms_opt(hhmmss / 10_000, (hhmmss / 100) % 100, hhmmss % 100)?;
    Some(Utc.from_utc_datetime(&naive))
}

/// Parse the `timestamp` string of a data message
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Format a timestamp for a data message
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Convert a WebSocket JSON message into a radio packet
pub fn packet_from_json(message: &Value) -> Result<RadioPacket, WireError> {
    let typ = message
        .get("type")
        .and_then(Value::as_str)
        .ok_or(WireError::Field("type"))?;
    let esp_id = message
        .get("esp_id")
        .and_then(number)
        .ok_or(WireError::Field("esp_id"))? as u8;
    let content = message.get("content").ok_or(WireError::Field("content"))?;

    match typ {
        "data" => Ok(RadioPacket::Data(data_from_json(esp_id, content))),
        "query" => {
            let query = if content.as_str() == Some(STILL_THERE) {
                QUERY_STILL_THERE
            } else {
                0
            };
            Ok(RadioPacket::Query(QueryPacket { esp_id, query }))
        }
        "request" => request_from_json(esp_id, content).map(RadioPacket::Request),
        "response" => Ok(RadioPacket::Response(response_from_json(esp_id, content))),
        other => Err(WireError::Json(format!("type `{}` has no radio layout", other))),
    }
}

/// Convert a radio packet into its WebSocket JSON message
pub fn packet_to_json(packet: &RadioPacket) -> Value {
    match packet {
        RadioPacket::Data(p) => json!({
            "type": "data",
            "esp_id": p.esp_id,
            "content": data_to_json(p),
        }),
        RadioPacket::Query(p) => {
            let content = if p.query == QUERY_STILL_THERE {
                STILL_THERE
            } else {
                ""
            };
            json!({ "type": "query", "esp_id": p.esp_id, "content": content })
        }
        RadioPacket::Request(p) => json!({
            "type": "request",
            "esp_id": p.esp_id,
            "content": request_to_json(p),
        }),
        RadioPacket::Response(p) => json!({
            "type": "response",
            "esp_id": p.esp_id,
            "content": response_to_json(p),
        }),
    }
}

fn number(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| value.as_f64().map(|f| f as i64))
}

fn int(content: &Value, key: &str) -> i64 {
    content.get(key).and_then(number).unwrap_or(0)
}

fn float(content: &Value, key: &str) -> f32 {
    content.get(key).and_then(Value::as_f64).unwrap_or(0.0) as f32
}

fn data_from_json(esp_id: u8, content: &Value) -> DataPacket {
    let (time, date) = content
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(parse_timestamp)
        .map(|ts| encode_timestamp(&ts))
        .unwrap_or((0.0, 0));

    DataPacket {
        esp_id,
        time,
        date,
        lat: float(content, "lat"),
        lon: float(content, "lon"),
        q: int(content, "Q") as u8,
        h: int(content, "H") as u8,
        v: int(content, "V") as u8,
        v_cells: ["V1", "V2", "V3", "V4"].map(|k| int(content, k) as u16),
        i: int(content, "I") as i8,
        i_cells: ["I1", "I2", "I3", "I4"].map(|k| int(content, k) as i16),
        a_t: int(content, "aT") as i16,
        c_t: int(content, "cT") as i16,
        t_cells: ["T1", "T2", "T3", "T4"].map(|k| int(content, k) as i16),
        otc: int(content, "OTC") as i16,
        wifi: content.get("wifi").and_then(Value::as_bool).unwrap_or(false),
    }
}

fn data_to_json(p: &DataPacket) -> Value {
    let timestamp = decode_timestamp(p.time, p.date)
        .map(|ts| format_timestamp(&ts))
        .unwrap_or_default();

    json!({
        "timestamp": timestamp,
        "lat": p.lat,
        "lon": p.lon,
        "Q": p.q,
        "H": p.h,
        "V": p.v,
        "V1": p.v_cells[0],
        "V2": p.v_cells[1],
        "V3": p.v_cells[2],
        "V4": p.v_cells[3],
        "I": p.i,
        "I1": p.i_cells[0],
        "I2": p.i_cells[1],
        "I3": p.i_cells[2],
        "I4": p.i_cells[3],
        "aT": p.a_t,
        "cT": p.c_t,
        "T1": p.t_cells[0],
        "T2": p.t_cells[1],
        "T3": p.t_cells[2],
        "T4": p.t_cells[3],
        "OTC": p.otc,
        "wifi": p.wifi,
    })
}

fn request_from_json(esp_id: u8, content: &Value) -> Result<RequestPacket, WireError> {
    let summary = content
        .get("summary")
        .and_then(Value::as_str)
        .ok_or(WireError::Field("summary"))?;
    let kind = RequestKind::from_summary(summary)
        .ok_or_else(|| WireError::Json(format!("unknown request `{}`", summary)))?;

    let mut packet = RequestPacket {
        esp_id,
        kind,
        ..Default::default()
    };

    if let Some(data) = content.get("data") {
        packet.new_esp_id = int(data, "new_esp_id") as u8;
        packet.otc = int(data, "OTC") as i16;
        if let Some(ssid) = data.get("ssid").and_then(Value::as_str) {
            packet.set_ssid(ssid);
        }
        if let Some(password) = data.get("password").and_then(Value::as_str) {
            packet.set_password(password);
        }
        packet.auto_connect = data
            .get("auto_connect")
            .and_then(Value::as_bool)
            .unwrap_or(false);
    }

    Ok(packet)
}

fn request_to_json(p: &RequestPacket) -> Value {
    let mut content = Map::new();
    if let Some(summary) = p.kind.summary() {
        content.insert("summary".into(), summary.into());
    }

    match p.kind {
        RequestKind::ChangeSettings => {
            content.insert(
                "data".into(),
                json!({ "new_esp_id": p.new_esp_id, "OTC": p.otc }),
            );
        }
        RequestKind::ConnectWifi => {
            content.insert(
                "data".into(),
                json!({
                    "ssid": p.ssid_str(),
                    "password": p.password_str(),
                    "auto_connect": p.auto_connect,
                }),
            );
        }
        _ => {}
    }

    Value::Object(content)
}

fn response_from_json(esp_id: u8, content: &Value) -> RequestPacket {
    let kind = content
        .get("summary")
        .and_then(Value::as_str)
        .and_then(RequestKind::from_summary)
        .unwrap_or_default();
    let success = content.get("status").and_then(Value::as_str) == Some("success")
        || content.get("response").and_then(Value::as_str) == Some("yes");

    RequestPacket {
        esp_id,
        kind,
        success,
        ..Default::default()
    }
}

fn response_to_json(p: &RequestPacket) -> Value {
    if p.kind == RequestKind::NoRequest && p.success {
        return json!({ "response": "yes" });
    }

    let mut content = Map::new();
    if let Some(summary) = p.kind.summary() {
        content.insert("summary".into(), summary.into());
    }
    let status = if p.success { "success" } else { "error" };
    content.insert("status".into(), status.into());
    Value::Object(content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_fields() {
        let ts = parse_timestamp("2024-03-09T12:35:19").unwrap();
        assert_eq!(encode_timestamp(&ts), (123519.0, 90324));
        assert_eq!(decode_timestamp(123519.0, 90324), Some(ts));
        assert_eq!(decode_timestamp(0.0, 0), None);
    }

    #[test]
    fn test_data_message_narrowing() {
        let message = json!({
            "type": "data",
            "esp_id": 4,
            "content": {
                "timestamp": "2024-03-09T12:35:19",
                "Q": 80, "H": 99, "V": 37, "V1": 3700, "I": -2, "I1": -150,
                "aT": 251, "T1": 2500, "OTC": 550, "wifi": true,
                "lat": 51.5, "lon": -0.25
            }
        });

        let RadioPacket::Data(packet) = packet_from_json(&message).unwrap() else {
            panic!("expected a data packet");
        };
        assert_eq!(packet.esp_id, 4);
        assert_eq!(packet.time, 123519.0);
        assert_eq!(packet.date, 90324);
        assert_eq!(packet.v_cells[0], 3700);
        assert_eq!(packet.i_cells[0], -150);
        assert_eq!(packet.otc, 550);
        assert!(packet.wifi);

        let back = packet_to_json(&RadioPacket::Data(packet));
        assert_eq!(back["content"]["timestamp"], "2024-03-09T12:35:19");
        assert_eq!(back["content"]["V1"], 3700);
        assert_eq!(back["content"]["lon"], -0.25);
    }

    #[test]
    fn test_query_message() {
        let message = json!({ "type": "query", "esp_id": 2, "content": STILL_THERE });
        let packet = packet_from_json(&message).unwrap();
        assert_eq!(
            packet,
            RadioPacket::Query(QueryPacket { esp_id: 2, query: QUERY_STILL_THERE })
        );
        assert_eq!(packet_to_json(&packet), message);
    }

    #[test]
    fn test_request_message() {
        let message = json!({
            "type": "request",
            "esp_id": 3,
            "content": {
                "summary": "connect-wifi",
                "data": { "ssid": "home", "password": "secret", "auto_connect": true }
            }
        });
        let packet = packet_from_json(&message).unwrap();
        let RadioPacket::Request(ref request) = packet else {
            panic!("expected a request packet");
        };
        assert_eq!(request.kind, RequestKind::ConnectWifi);
        assert_eq!(request.ssid_str(), "home");
        assert!(request.auto_connect);
        assert_eq!(packet_to_json(&packet), message);
    }

    #[test]
    fn test_response_message() {
        let packet = RadioPacket::Response(RequestPacket {
            esp_id: 3,
            kind: RequestKind::ResetBms,
            success: true,
            ..Default::default()
        });
        assert_eq!(
            packet_to_json(&packet),
            json!({
                "type": "response",
                "esp_id": 3,
                "content": { "summary": "reset-bms", "status": "success" }
            })
        );

        let yes = json!({ "type": "response", "esp_id": 1, "content": { "response": "yes" } });
        assert_eq!(packet_to_json(&packet_from_json(&yes).unwrap()), yes);
    }

    #[test]
    fn test_unrepresentable_messages() {
        let register = json!({ "type": "register", "esp_id": 1, "content": {} });
        assert!(matches!(packet_from_json(&register), Err(WireError::Json(_))));

        let missing = json!({ "type": "data", "content": {} });
        assert_eq!(packet_from_json(&missing), Err(WireError::Field("esp_id")));

        let unknown = json!({ "type": "request", "esp_id": 1, "content": { "summary": "dance" } });
        assert!(matches!(packet_from_json(&unknown), Err(WireError::Json(_))));
    }
}
