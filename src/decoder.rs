//! Decoder for ATC1441 / pvvx thermometer advertisements.
//!
//! The thermometers broadcast their readings as service data for the
//! Environmental Sensing UUID (0x181A). Both firmware layouts share that
//! header and differ only in length, so the decoder locates the header,
//! classifies the remainder by size and then reads the fields.
//!
//! Every advertisement is repeated several times by the device, and the
//! radio is configured not to filter repeats. The decoder keeps the last
//! advertisement counter per device to drop re-broadcasts and to count
//! advertisements that were never received.

use crate::labels::LabelTable;
use crate::mac_address::MacAddress;
use crate::measurement::{Measurement, WireFormat};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::time::{Instant, SystemTime};
use thiserror::Error;
use tracing::trace;

/// AD structure header in front of the thermometer data:
/// AD type 0x16 (service data, 16-bit UUID) followed by UUID 0x181A (LE).
pub const PREAMBLE: [u8; 3] = [0x16, 0x1A, 0x18];

/// Default upper bound of tracked devices.
pub const DEFAULT_DEVICE_CAPACITY: NonZeroUsize = NonZeroUsize::new(1024).unwrap();

/// Reasons an advertisement did not produce a measurement.
///
/// None of these are failures: the radio hears plenty of devices that are not
/// thermometers, and every thermometer reading arrives more than once.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeMiss {
    #[error("no thermometer service data in advertisement")]
    NoPreamble,
    #[error("unknown thermometer data length {0}")]
    UnknownLength(usize),
    #[error("advertisement {0} already seen")]
    Duplicate(u8),
}

/// Rolling state kept for every device heard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceState {
    /// Advertisement counter of the last accepted measurement
    pub last_sequence: Option<u8>,
    /// When the last accepted measurement was decoded
    pub last_observation: Option<Instant>,
}

/// Stateful advertisement decoder.
#[derive(Debug)]
pub struct SensorDecoder {
    labels: LabelTable,
    devices: HashMap<MacAddress, DeviceState>,
    capacity: NonZeroUsize,
}

impl SensorDecoder {
    /// Create a decoder resolving device labels from `labels`.
    pub fn new(labels: LabelTable) -> Self {
        Self::with_capacity(labels, DEFAULT_DEVICE_CAPACITY)
    }

    /// Create a decoder that tracks at most `capacity` devices.
    ///
    /// When a new device is heard while the table is full, the device that
    /// was observed least recently is forgotten.
    pub fn with_capacity(labels: LabelTable, capacity: NonZeroUsize) -> Self {
        Self {
            labels,
            devices: HashMap::new(),
            capacity,
        }
    }

    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }

    /// State recorded for `address`, if the device has been heard.
    pub fn device_state(&self, address: &MacAddress) -> Option<&DeviceState> {
        self.devices.get(address)
    }

    /// Number of devices currently tracked.
    pub fn tracked_devices(&self) -> usize {
        self.devices.len()
    }

    /// Decode a measurement, logging the reason at trace level when there is none.
    pub fn decode(&mut self, address: MacAddress, payload: &[u8]) -> Option<Measurement> {
        match self.try_decode(address, payload) {
            Ok(measurement) => Some(measurement),
            Err(miss) => {
                trace!(%address, len = payload.len(), "{miss}");
                None
            }
        }
    }

    /// Decode a measurement from the advertisement payload sent by `address`.
    pub fn try_decode(
        &mut self,
        address: MacAddress,
        payload: &[u8],
    ) -> Result<Measurement, DecodeMiss> {
        let start = payload
            .windows(PREAMBLE.len())
            .position(|window| window == PREAMBLE)
            .ok_or(DecodeMiss::NoPreamble)?;
        let data = &payload[start + PREAMBLE.len()..];

        let format = WireFormat::from_len(data.len()).ok_or(DecodeMiss::UnknownLength(data.len()))?;
        let sequence = data[format.sequence_offset()];

        let now = Instant::now();
        let state = self.state_mut(address);
        let missed_count = match state.last_sequence {
            Some(previous) if previous == sequence => return Err(DecodeMiss::Duplicate(sequence)),
            Some(previous) => sequence.wrapping_sub(previous).wrapping_sub(1),
            None => 0,
        };
        let interval = state.last_observation.map(|last| now.duration_since(last));
        state.last_sequence = Some(sequence);
        state.last_observation = Some(now);

        let fields = match format {
            WireFormat::Atc1441 => decode_atc1441(data),
            WireFormat::Pvvx => decode_pvvx(data),
        };

        Ok(Measurement {
            address,
            format,
            sequence_number: sequence,
            missed_count,
            observed_at: SystemTime::now(),
            interval,
            temperature_celsius: fields.temperature,
            relative_humidity_percent: fields.humidity,
            battery_millivolts: fields.battery_millivolts,
            battery_percent: fields.battery_percent,
            device_label: self.labels.resolve_label(&address),
        })
    }

    fn state_mut(&mut self, address: MacAddress) -> &mut DeviceState {
        if !self.devices.contains_key(&address) && self.devices.len() >= self.capacity.get() {
            self.evict_stalest();
        }
        self.devices.entry(address).or_default()
    }

    fn evict_stalest(&mut self) {
        let stalest = self
            .devices
            .iter()
            .min_by_key(|(_, state)| state.last_observation)
            .map(|(address, _)| *address);
        if let Some(address) = stalest {
            trace!(%address, "forgetting least recently observed device");
            self.devices.remove(&address);
        }
    }
}

struct Fields {
    temperature: f64,
    humidity: f64,
    battery_millivolts: u16,
    battery_percent: u8,
}

// Offsets below are relative to the data following the preamble. Both layouts
// start with the 6 byte device address.

fn decode_atc1441(data: &[u8]) -> Fields {
    Fields {
        temperature: f64::from(i16::from_be_bytes([data[6], data[7]])) / 10.0,
        humidity: f64::from(data[8]),
        battery_percent: data[9],
        battery_millivolts: u16::from_le_bytes([data[10], data[11]]),
    }
}

fn decode_pvvx(data: &[u8]) -> Fields {
    Fields {
        temperature: f64::from(i16::from_le_bytes([data[6], data[7]])) / 100.0,
        humidity: f64::from(u16::from_le_bytes([data[8], data[9]])) / 100.0,
        battery_millivolts: u16::from_le_bytes([data[10], data[11]]),
        battery_percent: data[12],
    }
}
