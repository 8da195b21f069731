//! MAC addresses and the tie-breaks derived from them.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// A 6-byte hardware address
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct MacAddress(pub [u8; 6]);

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            a, b, c, d, e, g
        )
    }
}

impl FromStr for MacAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut parts = s.split(':');
        for byte in bytes.iter_mut() {
            let part = parts.next().ok_or_else(|| format!("short MAC `{}`", s))?;
            *byte = u8::from_str_radix(part, 16).map_err(|e| format!("bad MAC `{}`: {}", s, e))?;
        }
        if parts.next().is_some() {
            return Err(format!("long MAC `{}`", s));
        }
        Ok(MacAddress(bytes))
    }
}

/// Lexicographic byte order of two addresses.
///
/// During a merge the node whose address compares `Less` moves its AP
/// subnet out of the way.
pub fn compare_mac(mine: &MacAddress, other: &MacAddress) -> Ordering {
    mine.0.cmp(&other.0)
}

/// Delay before the last root scan, spread by the low four address bytes
pub fn backoff_delay(mac: &MacAddress) -> Duration {
    let [_, _, a, b, c, d] = mac.0;
    let unique = u32::from_be_bytes([a, b, c, d]);
    Duration::from_millis((unique % 100_000 + 5_000) as u64)
}
