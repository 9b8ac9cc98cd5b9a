//! `mithermometer-listener` library.
//!
//! The binary (`src/main.rs`) is responsible for CLI parsing and process exit codes.
//! The core “business logic” lives in [`crate::app`] where it can be tested
//! deterministically with an injected HCI channel and injected output streams.

pub mod app;
pub mod decoder;
pub mod labels;
pub mod logging;
pub mod mac_address;
pub mod measurement;
pub mod output;
pub mod scanner;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use decoder::{DecodeMiss, DeviceState, SensorDecoder};
pub use labels::{Label, LabelTable, parse_label};
pub use mac_address::MacAddress;
pub use measurement::{Measurement, WireFormat};
pub use output::OutputFormatter;
pub use output::influxdb::InfluxDbFormatter;
pub use output::text::TextFormatter;
pub use scanner::{
    AdvertisementFrame, AdvertisingEnvelope, CommandFailure, HciChannel, ParseError, ScanError,
};
