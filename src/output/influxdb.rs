//! InfluxDB line protocol output formatter.

use crate::measurement::Measurement;
use crate::output::OutputFormatter;
use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

/// Field values for InfluxDB line protocol
#[derive(Debug, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FieldValue::Float(num) => write!(f, "{num}"),
            FieldValue::Integer(num) => write!(f, "{num}i"),
        }
    }
}

/// Data point in InfluxDB line protocol
#[derive(Debug)]
pub struct DataPoint {
    pub measurement: String,
    pub tag_set: BTreeMap<String, String>,
    pub field_set: BTreeMap<String, FieldValue>,
    pub timestamp: Option<SystemTime>,
}

/// Escape commas, equals signs and spaces in tag values.
fn escape_tag(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, ',' | '=' | ' ') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn fmt_tags(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    for (key, value) in data_point.tag_set.iter() {
        write!(fmt, ",{}={}", key, escape_tag(value))?;
    }
    Ok(())
}

fn fmt_fields(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    let mut first = true;
    for (key, value) in data_point.field_set.iter() {
        if first {
            first = false;
        } else {
            write!(fmt, ",")?;
        }
        write!(fmt, "{}={}", key, value)?;
    }
    Ok(())
}

fn fmt_timestamp(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    // A clock before the epoch leaves the timestamp to the server
    if let Some(nanos) = data_point
        .timestamp
        .and_then(|time| time.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|since_epoch| since_epoch.as_nanos())
    {
        write!(fmt, " {}", nanos)?;
    }
    Ok(())
}

impl fmt::Display for DataPoint {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}", self.measurement)?;
        fmt_tags(self, fmt)?;
        write!(fmt, " ")?;
        fmt_fields(self, fmt)?;
        fmt_timestamp(self, fmt)
    }
}

/// InfluxDB line protocol formatter.
///
/// The device label travels in the measurement itself, so the formatter
/// only needs the measurement name.
pub struct InfluxDbFormatter {
    /// The measurement name in InfluxDB
    measurement_name: String,
}

impl InfluxDbFormatter {
    /// Convert humidity from percent (0-100) to fraction (0-1).
    #[inline]
    fn humidity_fraction(percent: f64) -> f64 {
        percent / 100.0
    }

    /// Convert battery voltage from millivolts to Volts.
    #[inline]
    fn battery_volts(millivolts: u16) -> f64 {
        f64::from(millivolts) / 1000.0
    }

    pub fn new(measurement_name: String) -> Self {
        Self { measurement_name }
    }

    fn tag_set(&self, m: &Measurement) -> BTreeMap<String, String> {
        let mut tags = BTreeMap::new();
        tags.insert("mac".to_string(), m.address.to_string());
        tags.insert("name".to_string(), m.device_label.clone());
        tags.insert("format".to_string(), m.format.as_str().to_lowercase());
        tags
    }

    fn field_set(&self, m: &Measurement, rssi: i8) -> BTreeMap<String, FieldValue> {
        let mut fields = BTreeMap::new();

        fields.insert("temperature".into(), FieldValue::Float(m.temperature_celsius));
        fields.insert(
            "humidity".into(),
            FieldValue::Float(Self::humidity_fraction(m.relative_humidity_percent)),
        );
        fields.insert(
            "battery_potential".into(),
            FieldValue::Float(Self::battery_volts(m.battery_millivolts)),
        );
        fields.insert("battery_percent".into(), FieldValue::Integer(m.battery_percent.into()));
        fields.insert(
            "measurement_sequence_number".into(),
            FieldValue::Integer(m.sequence_number.into()),
        );
        fields.insert("missed_count".into(), FieldValue::Integer(m.missed_count.into()));
        fields.insert("rssi".into(), FieldValue::Integer(rssi.into()));

        fields
    }

    fn to_data_point(&self, measurement: &Measurement, rssi: i8) -> DataPoint {
        DataPoint {
            measurement: self.measurement_name.clone(),
            tag_set: self.tag_set(measurement),
            field_set: self.field_set(measurement, rssi),
            timestamp: Some(measurement.observed_at),
        }
    }
}

impl OutputFormatter for InfluxDbFormatter {
    fn format(&self, measurement: &Measurement, rssi: i8) -> String {
        format!("{}", self.to_data_point(measurement, rssi))
    }
}
