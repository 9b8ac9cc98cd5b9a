use crate::mac_address::MacAddress;
use crate::scanner::{EVT_CMD_COMPLETE, HCI_EVENT_PKT, HciChannel, HciFilter};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io;
use tokio::sync::Notify;

/// A stable Telink address for unit tests.
pub const TEST_MAC: MacAddress = MacAddress([0xA4, 0xC1, 0x38, 0xDD, 0xEE, 0xFF]);

/// Service data AD structure in the ATC1441 layout, including length and preamble.
pub fn atc1441_service_data(
    mac: MacAddress,
    temperature_decidegrees: i16,
    humidity: u8,
    battery_percent: u8,
    battery_millivolts: u16,
    sequence: u8,
) -> Vec<u8> {
    let mut data = vec![0x10, 0x16, 0x1A, 0x18];
    data.extend_from_slice(&mac.0);
    data.extend_from_slice(&temperature_decidegrees.to_be_bytes());
    data.push(humidity);
    data.push(battery_percent);
    data.extend_from_slice(&battery_millivolts.to_le_bytes());
    data.push(sequence);
    data
}

/// Service data AD structure in the pvvx layout, including length and preamble.
pub fn pvvx_service_data(
    mac: MacAddress,
    temperature_centidegrees: i16,
    humidity_centipercent: u16,
    battery_millivolts: u16,
    battery_percent: u8,
    sequence: u8,
) -> Vec<u8> {
    let mut address = mac.0;
    address.reverse();

    let mut data = vec![0x12, 0x16, 0x1A, 0x18];
    data.extend_from_slice(&address);
    data.extend_from_slice(&temperature_centidegrees.to_le_bytes());
    data.extend_from_slice(&humidity_centipercent.to_le_bytes());
    data.extend_from_slice(&battery_millivolts.to_le_bytes());
    data.push(battery_percent);
    data.push(sequence);
    data.push(0x05); // flags
    data
}

/// A complete HCI LE advertising report event as read from the socket.
pub fn advertising_report(mac: MacAddress, ad_data: &[u8], rssi: i8) -> Vec<u8> {
    let mut frame = vec![0x04, 0x3E, 0x00, 0x02, 0x01, 0x00, 0x00];
    let mut address = mac.0;
    address.reverse();
    frame.extend_from_slice(&address);
    frame.push(ad_data.len() as u8);
    frame.extend_from_slice(ad_data);
    frame.push(rssi as u8);
    frame[2] = (frame.len() - 3) as u8;
    frame
}

/// Whether the kernel would deliver `packet` on a socket with `filter`.
fn admits(filter: &HciFilter, packet: &[u8]) -> bool {
    let Some(&ptype) = packet.first() else {
        return false;
    };
    if ptype >= 32 || filter.type_mask & (1 << ptype) == 0 {
        return false;
    }
    if ptype != HCI_EVENT_PKT {
        return true;
    }
    let Some(&event) = packet.get(1) else {
        return false;
    };
    let bit = usize::from(event & 63);
    if filter.event_mask[bit / 32] & (1 << (bit % 32)) == 0 {
        return false;
    }
    if filter.opcode != 0 && event == EVT_CMD_COMPLETE {
        return packet.get(4..6) == Some(&filter.opcode.to_le_bytes()[..]);
    }
    true
}

/// An `HciChannel` fed from a queue that records every filter and command write.
///
/// `recv` hands out the first queued frame the current filter admits, and
/// leaves the others queued. Every sent command is answered with a Command
/// Complete carrying `command_status`, unless `silent` is set. Once no queued
/// frame is admitted `recv` never completes, like a quiet adapter, and
/// [`StubChannel::drained`] resolves.
#[derive(Debug, Default)]
pub struct StubChannel {
    frames: RefCell<VecDeque<io::Result<Vec<u8>>>>,
    filter: Cell<HciFilter>,
    pub filter_writes: RefCell<Vec<HciFilter>>,
    pub commands: RefCell<Vec<Vec<u8>>>,
    pub fail_commands: Cell<bool>,
    pub command_status: Cell<u8>,
    pub silent: Cell<bool>,
    drained: Notify,
}

impl StubChannel {
    pub fn new(initial_filter: HciFilter) -> Self {
        Self {
            filter: Cell::new(initial_filter),
            ..Self::default()
        }
    }

    pub fn push_frame(&self, frame: Vec<u8>) {
        self.frames.borrow_mut().push_back(Ok(frame));
    }

    pub fn push_error(&self, error: io::Error) {
        self.frames.borrow_mut().push_back(Err(error));
    }

    pub fn pending_frames(&self) -> usize {
        self.frames.borrow().len()
    }

    pub fn current_filter(&self) -> HciFilter {
        self.filter.get()
    }

    /// Resolves once every queued frame has been received.
    pub async fn drained(&self) {
        self.drained.notified().await;
    }
}

impl HciChannel for StubChannel {
    fn filter(&self) -> io::Result<HciFilter> {
        Ok(self.filter.get())
    }

    fn set_filter(&self, filter: &HciFilter) -> io::Result<()> {
        self.filter.set(*filter);
        self.filter_writes.borrow_mut().push(*filter);
        Ok(())
    }

    fn send_command(&self, packet: &[u8]) -> io::Result<()> {
        if self.fail_commands.get() {
            return Err(io::Error::from_raw_os_error(libc::EIO));
        }
        self.commands.borrow_mut().push(packet.to_vec());
        if !self.silent.get() {
            let reply = vec![
                HCI_EVENT_PKT,
                EVT_CMD_COMPLETE,
                0x04,
                0x01,
                packet[1],
                packet[2],
                self.command_status.get(),
            ];
            self.push_frame(reply);
        }
        Ok(())
    }

    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        let filter = self.filter.get();
        let next = {
            let mut frames = self.frames.borrow_mut();
            let index = frames
                .iter()
                .position(|frame| frame.as_ref().map_or(true, |raw| admits(&filter, raw)));
            index.and_then(|index| frames.remove(index))
        };
        match next {
            Some(Ok(frame)) => {
                let n = frame.len().min(buf.len());
                buf[..n].copy_from_slice(&frame[..n]);
                Ok(n)
            }
            Some(Err(error)) => Err(error),
            None => {
                self.drained.notify_one();
                std::future::pending().await
            }
        }
    }
}
