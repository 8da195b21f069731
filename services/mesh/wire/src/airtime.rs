//! LoRa airtime and duty-cycle pacing.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Selectable LoRa bandwidths in kHz, indexed by the radio's bandwidth code
pub const BANDWIDTHS_KHZ: [f64; 10] = [7.8, 10.4, 15.6, 20.8, 31.25, 41.7, 62.5, 125.0, 250.0, 500.0];

/// Bandwidth code used when an out-of-range code is configured (125 kHz)
pub const DEFAULT_BANDWIDTH: u8 = 7;

/// Symbol duration above which low data rate optimisation is mandatory
pub const LDRO_SYMBOL_THRESHOLD_MS: f64 = 16.0;

/// Radio modulation parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoraParams {
    /// Spreading factor (6..=12)
    pub spreading_factor: u8,
    /// Bandwidth code, index into [`BANDWIDTHS_KHZ`]
    pub bandwidth: u8,
    /// Coding rate offset, 1 for 4/5 up to 4 for 4/8
    pub coding_rate: u8,
    /// Preamble length in symbols
    pub preamble_len: u16,
    /// Explicit header mode
    pub explicit_header: bool,
    /// Force low data rate optimisation
    pub low_data_rate_optimisation: bool,
}

impl Default for LoraParams {
    fn default() -> Self {
        Self {
            spreading_factor: 7,
            bandwidth: DEFAULT_BANDWIDTH,
            coding_rate: 1,
            preamble_len: 8,
            explicit_header: true,
            low_data_rate_optimisation: false,
        }
    }
}

impl LoraParams {
    /// Whether LDRO is on, either forced or required by the symbol duration
    pub fn ldro_enabled(&self) -> bool {
        self.low_data_rate_optimisation
            || low_data_rate_optimisation_required(self.spreading_factor, self.bandwidth)
    }

    /// Time on air of a payload in milliseconds
    pub fn time_on_air_ms(&self, payload_len: usize) -> f64 {
        time_on_air_ms(
            self.spreading_factor,
            self.bandwidth,
            self.preamble_len,
            payload_len,
            self.coding_rate,
            self.explicit_header,
            self.ldro_enabled(),
        )
    }

    /// Minimum spacing between transmissions of a payload under a 1% duty cycle
    pub fn transmission_delay_ms(&self, payload_len: usize) -> u64 {
        transmission_delay_ms(self.time_on_air_ms(payload_len))
    }
}

/// Bandwidth in kHz for a bandwidth code
pub fn bandwidth_khz(bandwidth: u8) -> f64 {
    match BANDWIDTHS_KHZ.get(bandwidth as usize) {
        Some(&khz) => khz,
        None => {
            warn!(
                "Undefined bandwidth code {}, falling back to {} kHz",
                bandwidth, BANDWIDTHS_KHZ[DEFAULT_BANDWIDTH as usize]
            );
            BANDWIDTHS_KHZ[DEFAULT_BANDWIDTH as usize]
        }
    }
}

/// Symbol duration in milliseconds: `2^SF / BW`
pub fn symbol_duration_ms(spreading_factor: u8, bandwidth: u8) -> f64 {
    2f64.powi(spreading_factor as i32) / bandwidth_khz(bandwidth)
}

/// Whether the radio must enable low data rate optimisation
pub fn low_data_rate_optimisation_required(spreading_factor: u8, bandwidth: u8) -> bool {
    symbol_duration_ms(spreading_factor, bandwidth) > LDRO_SYMBOL_THRESHOLD_MS
}

/// Number of payload symbols, never negative
pub fn payload_symbols(
    spreading_factor: u8,
    payload_len: usize,
    coding_rate: u8,
    explicit_header: bool,
    ldro: bool,
) -> f64 {
    let sf = spreading_factor as f64;
    let header = if explicit_header { 20.0 } else { 0.0 };
    let de = if ldro { 2.0 } else { 0.0 };

    let numerator = 8.0 * payload_len as f64 - 4.0 * sf + 28.0 + 16.0 - header;
    let blocks = (numerator / (4.0 * (sf - de))).ceil();
    (blocks * (coding_rate as f64 + 4.0)).max(0.0)
}

/// Time on air in milliseconds
pub fn time_on_air_ms(
    spreading_factor: u8,
    bandwidth: u8,
    preamble_len: u16,
    payload_len: usize,
    coding_rate: u8,
    explicit_header: bool,
    ldro: bool,
) -> f64 {
    let t_sym = symbol_duration_ms(spreading_factor, bandwidth);
    let n_payload = payload_symbols(spreading_factor, payload_len, coding_rate, explicit_header, ldro);
    (4.25 + preamble_len as f64 + n_payload) * t_sym
}

/// Delay between transmissions in whole milliseconds for a given airtime.
///
/// A 1% duty cycle allows 36 s of airtime per hour, so one transmission
/// every `3600 / (36000 / t_air)` seconds.
pub fn transmission_delay_ms(time_on_air_ms: f64) -> u64 {
    let per_hour = 36e3 / time_on_air_ms;
    ((3600.0 / per_hour) * 1e3) as u64
}
