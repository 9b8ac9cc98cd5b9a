//! Parsing of HCI LE advertising report events.
//!
//! Layout of a frame read from the raw socket:
//!
//! ```text
//! 0      packet type (0x04, event)
//! 1      event code (0x3E, LE meta event)
//! 2      parameter length
//! 3      sub-event (0x02, advertising report)
//! 4      number of reports
//! 5      advertisement event type
//! 6      address type
//! 7..13  address, least significant octet first
//! 13..   advertising data (length byte followed by AD structures)
//! last   RSSI
//! ```
//!
//! Only the first report of an event is looked at. Controllers deliver one
//! report per event in practice.
//!
//! Command Complete events, the reply to every scan command, are parsed by
//! [`CommandComplete::parse`].

use super::{EVT_CMD_COMPLETE, HCI_EVENT_PKT};
use crate::mac_address::MacAddress;
use thiserror::Error;

/// Header, sub-event, report count, event type, address type, address and RSSI.
pub const MIN_FRAME_LEN: usize = 14;

const ADDRESS_OFFSET: usize = 7;
const PAYLOAD_OFFSET: usize = ADDRESS_OFFSET + 6;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("frame truncated: {len} bytes, need at least {MIN_FRAME_LEN}")]
    Truncated { len: usize },
}

/// Fixed HCI event header plus the LE meta sub-event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub packet_type: u8,
    pub event: u8,
    pub length: u8,
    pub sub_event: u8,
}

/// The parts of an advertising report the decoder cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvertisingEnvelope<'a> {
    pub address: MacAddress,
    pub advertisement_type: u8,
    /// Bytes between the address and the trailing RSSI
    pub payload: &'a [u8],
    /// RSSI in dBm
    pub signal_strength: i8,
}

/// A parsed frame borrowing its payload from the receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvertisementFrame<'a> {
    pub header: FrameHeader,
    pub envelope: AdvertisingEnvelope<'a>,
}

impl<'a> AdvertisementFrame<'a> {
    pub fn parse(raw: &'a [u8]) -> Result<Self, ParseError> {
        parse(raw)
    }
}

/// Parse a raw frame into header and envelope.
pub fn parse(raw: &[u8]) -> Result<AdvertisementFrame<'_>, ParseError> {
    if raw.len() < MIN_FRAME_LEN {
        return Err(ParseError::Truncated { len: raw.len() });
    }

    let header = FrameHeader {
        packet_type: raw[0],
        event: raw[1],
        length: raw[2],
        sub_event: raw[3],
    };

    let mut address = [0u8; 6];
    address.copy_from_slice(&raw[ADDRESS_OFFSET..PAYLOAD_OFFSET]);

    let last = raw.len() - 1;
    Ok(AdvertisementFrame {
        header,
        envelope: AdvertisingEnvelope {
            address: MacAddress::from_hci_bytes(&address),
            advertisement_type: raw[5],
            payload: &raw[PAYLOAD_OFFSET..last],
            signal_strength: raw[last] as i8,
        },
    })
}

/// Reply to an HCI command.
///
/// ```text
/// 0      packet type (0x04, event)
/// 1      event code (0x0E)
/// 2      parameter length
/// 3      number of command packets the controller accepts
/// 4..6   opcode of the completed command, little-endian
/// 6      status, 0x00 on success
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandComplete {
    pub opcode: u16,
    pub status: u8,
}

impl CommandComplete {
    /// `None` unless `raw` is a Command Complete event carrying a status.
    pub fn parse(raw: &[u8]) -> Option<Self> {
        match raw {
            [HCI_EVENT_PKT, EVT_CMD_COMPLETE, _, _, lo, hi, status, ..] => Some(Self {
                opcode: u16::from_le_bytes([*lo, *hi]),
                status: *status,
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::{EVT_LE_ADVERTISING_REPORT, EVT_LE_META_EVENT};
    use crate::test_utils::{TEST_MAC, advertising_report, pvvx_service_data};

    #[test]
    fn test_parse_advertising_report() {
        let ad_data = pvvx_service_data(TEST_MAC, 2000, 5000, 3000, 99, 1);
        let raw = advertising_report(TEST_MAC, &ad_data, -67);
        let frame = parse(&raw).unwrap();

        assert_eq!(frame.header.packet_type, HCI_EVENT_PKT);
        assert_eq!(frame.header.event, EVT_LE_META_EVENT);
        assert_eq!(usize::from(frame.header.length), raw.len() - 3);
        assert_eq!(frame.header.sub_event, EVT_LE_ADVERTISING_REPORT);
        assert_eq!(frame.envelope.address, TEST_MAC);
        assert_eq!(frame.envelope.advertisement_type, 0);
        assert_eq!(frame.envelope.signal_strength, -67);

        // payload starts with the advertising data length byte
        assert_eq!(frame.envelope.payload[0] as usize, ad_data.len());
        assert_eq!(&frame.envelope.payload[1..], ad_data.as_slice());
    }

    #[test]
    fn test_parse_minimum_frame() {
        let raw = advertising_report(TEST_MAC, &[], 0);
        assert_eq!(raw.len(), MIN_FRAME_LEN + 1);
        let frame = parse(&raw).unwrap();
        assert_eq!(frame.envelope.payload, &[0]);

        let frame = parse(&raw[1..]).unwrap();
        assert!(frame.envelope.payload.is_empty());
    }

    #[test]
    fn test_parse_truncated() {
        assert_eq!(parse(&[]), Err(ParseError::Truncated { len: 0 }));
        assert_eq!(
            parse(&[0x04, 0x3E, 0x0A, 0x02, 0x01]),
            Err(ParseError::Truncated { len: 5 })
        );
    }

    #[test]
    fn test_parse_command_complete() {
        let reply = CommandComplete::parse(&[0x04, 0x0E, 0x04, 0x01, 0x0B, 0x20, 0x0C]);
        assert_eq!(
            reply,
            Some(CommandComplete {
                opcode: 0x200B,
                status: 0x0C
            })
        );

        // status truncated
        assert_eq!(CommandComplete::parse(&[0x04, 0x0E, 0x03, 0x01, 0x0B, 0x20]), None);
        // command status event
        assert_eq!(CommandComplete::parse(&[0x04, 0x0F, 0x04, 0x00, 0x01, 0x0B, 0x20]), None);

        let report = advertising_report(TEST_MAC, &[], -40);
        assert_eq!(CommandComplete::parse(&report), None);
    }

    #[test]
    fn test_parse_error_display() {
        let err = ParseError::Truncated { len: 3 };
        assert_eq!(err.to_string(), "frame truncated: 3 bytes, need at least 14");
    }
}
