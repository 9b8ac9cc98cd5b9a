//! Output formatters for thermometer measurements.
//!
//! This module provides a trait for formatting measurements and the two
//! supported formats: a human-readable text line and InfluxDB line protocol
//! for Telegraf.

pub mod influxdb;
pub mod text;

use crate::measurement::Measurement;

/// Trait for formatting measurements into output strings.
pub trait OutputFormatter: Send + Sync {
    /// Format a measurement received with the given RSSI (dBm).
    fn format(&self, measurement: &Measurement, rssi: i8) -> String;
}

/// Selectable output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Format {
    /// Aligned, human-readable lines
    #[default]
    Text,
    /// InfluxDB line protocol
    Influxdb,
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Format::Text => write!(f, "text"),
            Format::Influxdb => write!(f, "influxdb"),
        }
    }
}
