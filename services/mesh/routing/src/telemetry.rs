//! Telemetry snapshots and the `data` message built from them.
//!
//! Values are carried in the BMS's raw integer units. Browsers get a scaled
//! copy; the cloud and mesh peers get the raw message.

use chrono::{DateTime, Utc};
use mesh_wire::json::format_timestamp;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Divide by 10 for browsers
const DECI_FIELDS: [&str; 4] = ["V", "I", "aT", "cT"];

/// Divide by 100 for browsers
const CENTI_FIELDS: [&str; 12] = [
    "V1", "V2", "V3", "V4", "I1", "I2", "I3", "I4", "T1", "T2", "T3", "T4",
];

/// One reading of the battery pack and its position
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    /// Reading time, `%Y-%m-%dT%H:%M:%S`
    pub timestamp: String,
    /// Latitude
    pub lat: f32,
    /// Longitude
    pub lon: f32,
    /// State of charge in percent
    #[serde(rename = "Q")]
    pub q: u8,
    /// State of health in percent
    #[serde(rename = "H")]
    pub h: u8,
    /// Pack voltage, 0.1 units
    #[serde(rename = "V")]
    pub v: u16,
    /// Cell voltages, 0.01 units
    #[serde(rename = "V1")]
    pub v1: u16,
    /// V2
    #[serde(rename = "V2")]
    pub v2: u16,
    /// V3
    #[serde(rename = "V3")]
    pub v3: u16,
    /// V4
    #[serde(rename = "V4")]
    pub v4: u16,
    /// Pack current, 0.1 units
    #[serde(rename = "I")]
    pub i: i16,
    /// Cell currents, 0.01 units
    #[serde(rename = "I1")]
    pub i1: i16,
    /// I2
    #[serde(rename = "I2")]
    pub i2: i16,
    /// I3
    #[serde(rename = "I3")]
    pub i3: i16,
    /// I4
    #[serde(rename = "I4")]
    pub i4: i16,
    /// Ambient temperature, 0.1 units
    #[serde(rename = "aT")]
    pub a_t: i16,
    /// Chip temperature, 0.1 units
    #[serde(rename = "cT")]
    pub c_t: i16,
    /// Cell temperatures, 0.01 units
    #[serde(rename = "T1")]
    pub t1: i16,
    /// T2
    #[serde(rename = "T2")]
    pub t2: i16,
    /// T3
    #[serde(rename = "T3")]
    pub t3: i16,
    /// T4
    #[serde(rename = "T4")]
    pub t4: i16,
    /// Overtemperature charge threshold
    #[serde(rename = "OTC")]
    pub otc: i16,
    /// Node is on a home network
    pub wifi: bool,
}

impl TelemetrySnapshot {
    /// Stamp the snapshot with a reading time
    pub fn with_timestamp(mut self, at: &DateTime<Utc>) -> Self {
        self.timestamp = format_timestamp(at);
        self
    }
}

/// Build the raw `data` message for a snapshot
pub fn data_message(esp_id: u8, snapshot: &TelemetrySnapshot) -> Result<Value, serde_json::Error> {
    Ok(json!({
        "type": "data",
        "esp_id": esp_id,
        "content": serde_json::to_value(snapshot)?,
    }))
}

/// Copy of a `data` message with values converted to display units
pub fn scale_for_frontend(message: &Value) -> Value {
    let mut scaled = message.clone();
    let Some(content) = scaled.get_mut("content").and_then(Value::as_object_mut) else {
        return scaled;
    };

    let fields = DECI_FIELDS
        .iter()
        .map(|k| (k, 10.0))
        .chain(CENTI_FIELDS.iter().map(|k| (k, 100.0)));
    for (key, divisor) in fields {
        if let Some(value) = content.get_mut(*key) {
            if let Some(raw) = value.as_f64() {
                *value = json!(raw.trunc() / divisor);
            }
        }
    }
    scaled
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> TelemetrySnapshot {
        TelemetrySnapshot {
            q: 87,
            h: 99,
            v: 3700,
            v1: 3700,
            i: -25,
            i1: 1250,
            a_t: 215,
            c_t: 301,
            t4: 2550,
            otc: 550,
            lat: 51.5,
            ..Default::default()
        }
    }

    #[test]
    fn test_data_message_shape() {
        let message = data_message(3, &snapshot()).unwrap();
        assert_eq!(message["type"], "data");
        assert_eq!(message["esp_id"], 3);
        assert_eq!(message["content"]["V"], 3700);
        assert_eq!(message["content"]["aT"], 215);
        assert_eq!(message["content"]["wifi"], false);
    }

    #[test]
    fn test_scaling_for_browsers() {
        let message = data_message(3, &snapshot()).unwrap();
        let scaled = scale_for_frontend(&message);
        let content = &scaled["content"];

        assert_eq!(content["V"].as_f64(), Some(370.0));
        assert_eq!(content["V1"].as_f64(), Some(37.0));
        assert_eq!(content["I"].as_f64(), Some(-2.5));
        assert_eq!(content["I1"].as_f64(), Some(12.5));
        assert_eq!(content["T4"].as_f64(), Some(25.5));
        assert_eq!(content["cT"].as_f64(), Some(30.1));

        // untouched
        assert_eq!(content["Q"], 87);
        assert_eq!(content["OTC"], 550);
        assert_eq!(content["lat"], message["content"]["lat"]);
        assert_eq!(message["content"]["V"], 3700);
    }

    #[test]
    fn test_scaling_ignores_other_messages() {
        let message = json!({ "type": "response", "esp_id": 1, "content": "OK" });
        assert_eq!(scale_for_frontend(&message), message);
    }
}
