//! Passive BLE scanning over a raw HCI socket.
//!
//! The scanner is split in three layers:
//! - [`hci`] talks to the kernel: adapter up/down and the raw socket itself.
//! - [`session`] drives the LE scan commands and the filtered receive loop
//!   over anything implementing [`HciChannel`].
//! - [`frame`] parses the received LE meta events into advertising envelopes.

pub mod frame;
pub mod hci;
pub mod session;

pub use frame::{AdvertisementFrame, AdvertisingEnvelope, CommandComplete, FrameHeader, ParseError};
pub use session::{HandlerError, ScanSession};

use std::future::Future;
use std::io;
use std::time::Duration;
use thiserror::Error;

// HCI packet types
pub const HCI_COMMAND_PKT: u8 = 0x01;
pub const HCI_EVENT_PKT: u8 = 0x04;

// HCI events
pub const EVT_CMD_COMPLETE: u8 = 0x0E;
pub const EVT_LE_META_EVENT: u8 = 0x3E;

// LE Meta event sub-events
pub const EVT_LE_ADVERTISING_REPORT: u8 = 0x02;

/// Error type for adapter and scan operations.
#[derive(Error, Debug)]
pub enum ScanError {
    /// The adapter could not be opened or brought up
    #[error("Bluetooth adapter hci{adapter} unavailable: {source}")]
    RadioUnavailable { adapter: u16, source: io::Error },
    /// A scan command could not be sent or the adapter rejected it
    #[error("HCI command {command} failed: {source}")]
    RadioCommandFailed {
        command: &'static str,
        source: CommandFailure,
    },
    /// Reading or installing the socket event filter failed
    #[error("HCI filter error: {0}")]
    Filter(io::Error),
    /// Receiving from the socket failed
    #[error("HCI socket error: {0}")]
    Io(io::Error),
    /// The scan was cancelled by an interrupt
    #[error("interrupted")]
    Interrupted,
}

/// Why an HCI command did not complete.
#[derive(Error, Debug)]
pub enum CommandFailure {
    #[error("write failed: {0}")]
    Write(io::Error),
    /// Reading the reply from the socket failed
    #[error("reading reply failed: {0}")]
    Reply(io::Error),
    /// Non-zero status in the Command Complete event
    #[error("controller returned status 0x{0:02X}")]
    Status(u8),
    #[error("no reply within {0:?}")]
    Timeout(Duration),
}

/// Kernel socket filter for raw HCI sockets (`struct hci_ufilter`).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HciFilter {
    pub type_mask: u32,
    pub event_mask: [u32; 2],
    pub opcode: u16,
}

impl HciFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter admitting only LE meta events.
    pub fn le_meta_events() -> Self {
        let mut filter = Self::new();
        filter.set_ptype(HCI_EVENT_PKT);
        filter.set_event(EVT_LE_META_EVENT);
        filter
    }

    /// Filter admitting only the Command Complete event for `opcode`.
    pub fn command_complete(opcode: u16) -> Self {
        let mut filter = Self::new();
        filter.set_ptype(HCI_EVENT_PKT);
        filter.set_event(EVT_CMD_COMPLETE);
        filter.opcode = opcode;
        filter
    }

    pub fn set_ptype(&mut self, ptype: u8) {
        self.type_mask |= 1 << u32::from(ptype);
    }

    pub fn set_event(&mut self, event: u8) {
        let bit = usize::from(event);
        self.event_mask[bit / 32] |= 1 << (bit % 32);
    }
}

/// Raw HCI channel bound to one adapter.
///
/// Implemented by [`hci::HciSocket`]; tests substitute a recording stub.
pub trait HciChannel {
    /// Currently installed socket filter.
    fn filter(&self) -> io::Result<HciFilter>;

    /// Replace the socket filter.
    fn set_filter(&self, filter: &HciFilter) -> io::Result<()>;

    /// Write one complete HCI command packet.
    fn send_command(&self, packet: &[u8]) -> io::Result<()>;

    /// Wait for the next packet and copy it into `buf`, returning its length.
    fn recv(&self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>>;
}

/// Command opcode: group in the top 6 bits, command in the low 10.
pub fn hci_opcode(ogf: u16, ocf: u16) -> u16 {
    (ogf << 10) | ocf
}

/// Create an HCI command packet
pub fn hci_command_packet(ogf: u16, ocf: u16, params: &[u8]) -> Vec<u8> {
    let opcode = hci_opcode(ogf, ocf);
    let mut packet = Vec::with_capacity(4 + params.len());
    packet.push(HCI_COMMAND_PKT);
    packet.extend_from_slice(&opcode.to_le_bytes());
    packet.push(params.len() as u8);
    packet.extend_from_slice(params);
    packet
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hci_filter_setup() {
        let filter = HciFilter::le_meta_events();

        // HCI_EVENT_PKT (0x04) sets bit 4 in type_mask
        assert_eq!(filter.type_mask, 1 << HCI_EVENT_PKT);
        // EVT_LE_META_EVENT (0x3E = 62) sets bit 30 in event_mask[1]
        assert_eq!(filter.event_mask, [0, 1 << (EVT_LE_META_EVENT % 32)]);
        assert_eq!(filter.opcode, 0);
    }

    #[test]
    fn test_hci_filter_matches_kernel_layout() {
        assert_eq!(std::mem::size_of::<HciFilter>(), 16);
    }

    #[test]
    fn test_command_complete_filter() {
        let filter = HciFilter::command_complete(0x200B);
        assert_eq!(filter.type_mask, 1 << HCI_EVENT_PKT);
        assert_eq!(filter.event_mask, [1 << EVT_CMD_COMPLETE, 0]);
        assert_eq!(filter.opcode, 0x200B);
    }

    #[test]
    fn test_hci_command_packet() {
        let packet = hci_command_packet(0x08, 0x000C, &[0x01, 0x00]);
        assert_eq!(packet, vec![0x01, 0x0C, 0x20, 0x02, 0x01, 0x00]);
    }

    #[test]
    fn test_scan_error_display() {
        let err = ScanError::RadioUnavailable {
            adapter: 1,
            source: io::Error::from_raw_os_error(libc::ENODEV),
        };
        assert!(err.to_string().starts_with("Bluetooth adapter hci1 unavailable: "));
        assert_eq!(ScanError::Interrupted.to_string(), "interrupted");

        let err = ScanError::RadioCommandFailed {
            command: "LE Set Scan Enable",
            source: CommandFailure::Status(0x0C),
        };
        assert_eq!(
            err.to_string(),
            "HCI command LE Set Scan Enable failed: controller returned status 0x0C"
        );
    }
}
