//! Human-readable line formatter.
//!
//! ```text
//! 2024-01-05 18:02:11.532  [kitchen] (PVVX     42)            21.53 °C     45.2 % rH   Bat  87% (2950 mV)  RSSI -70 dBm  (10.021 s, missed 2)
//! ```

use crate::measurement::Measurement;
use crate::output::OutputFormatter;
use chrono::{DateTime, Local, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::fmt::Write;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Width of the bracketed device column: label, format and counter.
const DEVICE_COLUMN_WIDTH: usize = 32;

pub struct TextFormatter {
    label_width: AtomicUsize,
    utc: bool,
}

impl TextFormatter {
    /// Create a formatter padding labels to `label_width` characters.
    ///
    /// A longer label, such as the full address of a device without the
    /// Telink prefix, widens the column for every following line.
    pub fn new(label_width: usize) -> Self {
        Self {
            label_width: AtomicUsize::new(label_width),
            utc: false,
        }
    }

    /// Print timestamps in UTC instead of local time.
    pub fn utc(mut self) -> Self {
        self.utc = true;
        self
    }

    fn timestamp(&self, m: &Measurement) -> String {
        if self.utc {
            DateTime::<Utc>::from(m.observed_at)
                .format(TIMESTAMP_FORMAT)
                .to_string()
        } else {
            DateTime::<Local>::from(m.observed_at)
                .format(TIMESTAMP_FORMAT)
                .to_string()
        }
    }
}

impl OutputFormatter for TextFormatter {
    fn format(&self, m: &Measurement, rssi: i8) -> String {
        let width = self.label_width.load(Ordering::Relaxed).max(m.device_label.chars().count());
        self.label_width.store(width, Ordering::Relaxed);

        let device = format!(
            "[{:width$}] ({:7} {:3})",
            m.device_label, m.format, m.sequence_number,
        );

        let mut line = format!(
            "{}  {:device_width$}  {:6.2} °C   {:6.1} % rH   Bat {:3}% ({:4} mV)  RSSI {} dBm",
            self.timestamp(m),
            device,
            m.temperature_celsius,
            m.relative_humidity_percent,
            m.battery_percent,
            m.battery_millivolts,
            rssi,
            device_width = DEVICE_COLUMN_WIDTH,
        );

        let mut details = Vec::new();
        if let Some(interval) = m.interval {
            details.push(format!("{:6.3} s", interval.as_secs_f64()));
        }
        if m.missed_count > 0 {
            details.push(format!("missed {}", m.missed_count));
        }
        if !details.is_empty() {
            // writing to a String cannot fail
            let _ = write!(line, "  ({})", details.join(", "));
        }

        line
    }
}
