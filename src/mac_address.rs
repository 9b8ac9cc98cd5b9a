//! Bluetooth device address type.
//!
//! Addresses are kept in canonical order (most significant octet first), the
//! way they are printed. The HCI layer transmits them least significant
//! octet first, see [`MacAddress::from_hci_bytes`].

use std::fmt;
use std::hash::Hash;
use std::str::FromStr;
use thiserror::Error;

/// A Bluetooth device address stored as a compact 6-byte array.
///
/// Cheap to copy and hash, so it is used directly as the key of the
/// per-device decoder state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// Build an address from the little-endian octet order used on the HCI wire.
    pub fn from_hci_bytes(bytes: &[u8; 6]) -> Self {
        let mut addr = *bytes;
        addr.reverse();
        Self(addr)
    }

    /// Whether the first three octets (the OUI) equal `prefix`.
    pub fn has_prefix(&self, prefix: [u8; 3]) -> bool {
        self.0[..3] == prefix
    }

    /// The last three octets as six upper-case hex digits, e.g. `12ABCD`.
    pub fn device_suffix(&self) -> String {
        format!("{:02X}{:02X}{:02X}", self.0[3], self.0[4], self.0[5])
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

/// Errors returned when parsing a MAC address string.
#[derive(Error, Debug, PartialEq)]
pub enum ParseMacError {
    #[error("invalid MAC address: expected 6 parts, got {0}")]
    InvalidLength(usize),
    #[error("invalid MAC address: part {0} has wrong length")]
    InvalidPartLength(usize),
    #[error("invalid MAC address: '{0}' is not valid hex")]
    InvalidHex(String),
}

impl FromStr for MacAddress {
    type Err = ParseMacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        if parts.len() != 6 {
            return Err(ParseMacError::InvalidLength(parts.len()));
        }

        let mut bytes = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            if part.len() != 2 {
                return Err(ParseMacError::InvalidPartLength(i));
            }
            bytes[i] = u8::from_str_radix(part, 16)
                .map_err(|_| ParseMacError::InvalidHex(part.to_string()))?;
        }

        Ok(MacAddress(bytes))
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}
