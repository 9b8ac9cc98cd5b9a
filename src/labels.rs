//! Human-readable labels for thermometers.
//!
//! Labels come from `MAC=NAME` pairs given on the command line. Sensors
//! without a configured label still get a short name derived from their
//! address, so the output stays readable for an unconfigured household.

use crate::mac_address::MacAddress;
use std::collections::BTreeMap;

/// OUI used by the Telink based Xiaomi LYWSD03MMC thermometers.
pub const TELINK_OUI: [u8; 3] = [0xA4, 0xC1, 0x38];

/// A parsed label mapping a device address to a human-readable name.
#[derive(Debug, Clone, PartialEq)]
pub struct Label {
    /// The device address
    pub address: MacAddress,
    /// The human-readable name (e.g., "Kitchen")
    pub name: String,
}

/// Parse a label from a string in the format "MAC=NAME".
///
/// The address is normalized, so `a4:c1:38:00:00:01=Sauna` and
/// `A4:C1:38:00:00:01=Sauna` configure the same device.
///
/// # Example
/// ```
/// use mithermometer_listener::labels::parse_label;
///
/// let label = parse_label("A4:C1:38:00:00:01=Kitchen").unwrap();
/// assert_eq!(label.address.to_string(), "A4:C1:38:00:00:01");
/// assert_eq!(label.name, "Kitchen");
/// ```
pub fn parse_label(src: &str) -> Result<Label, String> {
    let (address, name) = src
        .split_once('=')
        .ok_or_else(|| "invalid label: expected format MAC=NAME".to_string())?;
    let address = address
        .parse::<MacAddress>()
        .map_err(|e| format!("invalid label: {e}"))?;
    Ok(Label {
        address,
        name: name.into(),
    })
}

/// Static address → label table consulted when a measurement is built.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelTable {
    labels: BTreeMap<String, String>,
}

impl LabelTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the label of `address`.
    pub fn insert(&mut self, address: MacAddress, name: impl Into<String>) {
        self.labels.insert(address.to_string(), name.into());
    }

    /// Look up a configured label without any fallback.
    pub fn get(&self, address: &MacAddress) -> Option<&str> {
        self.labels.get(&address.to_string()).map(String::as_str)
    }

    /// Resolve the label shown for `address`.
    ///
    /// Configured labels win. Telink devices fall back to the last three
    /// octets (`A4:C1:38:12:AB:CD` → `12ABCD`), anything else to the full
    /// address.
    pub fn resolve_label(&self, address: &MacAddress) -> String {
        if let Some(name) = self.get(address) {
            return name.to_string();
        }
        if address.has_prefix(TELINK_OUI) {
            address.device_suffix()
        } else {
            address.to_string()
        }
    }

    /// Width of the longest label this table can resolve to for a Telink device.
    ///
    /// Other devices resolve to the 17 character address, which the text
    /// formatter makes room for when the first one is printed.
    pub fn max_label_width(&self) -> usize {
        self.labels
            .values()
            .map(|name| name.chars().count())
            .max()
            .unwrap_or(0)
            .max(6)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl FromIterator<Label> for LabelTable {
    fn from_iter<T: IntoIterator<Item = Label>>(iter: T) -> Self {
        let mut table = LabelTable::new();
        for label in iter {
            table.insert(label.address, label.name);
        }
        table
    }
}

impl From<&[Label]> for LabelTable {
    fn from(labels: &[Label]) -> Self {
        labels.iter().cloned().collect()
    }
}
