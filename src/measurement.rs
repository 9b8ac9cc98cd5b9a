//! Thermometer measurement data structure.

use crate::mac_address::MacAddress;
use std::fmt;
use std::time::{Duration, SystemTime};

/// Advertisement layout broadcast by the custom thermometer firmwares.
///
/// The two layouts carry the same UUID and are told apart by the length of
/// the service data alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireFormat {
    /// Original ATC1441 layout, 13 bytes after the preamble, big-endian temperature.
    Atc1441,
    /// pvvx custom layout, 15 bytes after the preamble, little-endian fields.
    Pvvx,
}

impl WireFormat {
    /// Classify the service data length (bytes after the preamble).
    pub fn from_len(len: usize) -> Option<Self> {
        match len {
            13 => Some(WireFormat::Atc1441),
            15 => Some(WireFormat::Pvvx),
            _ => None,
        }
    }

    /// Position of the advertisement counter within the service data.
    pub fn sequence_offset(self) -> usize {
        match self {
            WireFormat::Atc1441 => 12,
            WireFormat::Pvvx => 13,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WireFormat::Atc1441 => "ATC1441",
            WireFormat::Pvvx => "PVVX",
        }
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// A measurement from a thermometer.
///
/// Produced once per advertisement counter value; re-broadcasts of the same
/// counter never become a `Measurement`.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    /// Address of the thermometer
    pub address: MacAddress,
    /// Layout the advertisement was decoded from
    pub format: WireFormat,
    /// Advertisement counter, wraps at 256
    pub sequence_number: u8,
    /// Counter values skipped since the previous measurement of this device
    pub missed_count: u8,
    /// Wall clock time when the advertisement was decoded
    pub observed_at: SystemTime,
    /// Time since the previous measurement of this device, if any
    pub interval: Option<Duration>,
    /// Temperature in Celsius
    pub temperature_celsius: f64,
    /// Relative humidity in percent (0-100)
    pub relative_humidity_percent: f64,
    /// Battery voltage in millivolts
    pub battery_millivolts: u16,
    /// Battery level in percent
    pub battery_percent: u8,
    /// Configured or derived device label
    pub device_label: String,
}
