//! LE passive scan session.
//!
//! A [`ScanSession`] issues the scan commands on an [`HciChannel`] and runs
//! the receive loop. Every command waits for the controller's Command
//! Complete event and fails on a non-zero status. Two pieces of adapter
//! state are changed while scanning and both are put back on every exit path:
//! - socket filters installed while waiting for a reply or receiving reports
//!   are restored when the wait or the loop ends,
//! - scanning enabled through [`ScanSession::set_scanning`] is disabled when
//!   the session is dropped.

use super::frame::{self, AdvertisingEnvelope, CommandComplete};
use super::{
    CommandFailure, EVT_LE_ADVERTISING_REPORT, EVT_LE_META_EVENT, HciChannel, HciFilter,
    ScanError, hci_command_packet, hci_opcode,
};
use std::convert::Infallible;
use std::error::Error;
use std::future::Future;
use std::io;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

// HCI commands
const OGF_LE_CTL: u16 = 0x08;
const OCF_LE_SET_SCAN_PARAMETERS: u16 = 0x000B;
const OCF_LE_SET_SCAN_ENABLE: u16 = 0x000C;

// Scan types
const LE_SCAN_PASSIVE: u8 = 0x00;

// Own address type
const LE_PUBLIC_ADDRESS: u8 = 0x00;

// Filter policy
const FILTER_POLICY_ACCEPT_ALL: u8 = 0x00;

// Command Complete status codes
const HCI_SUCCESS: u8 = 0x00;
const HCI_COMMAND_DISALLOWED: u8 = 0x0C;

/// 1.28 s in 0.625 ms units. Interval and window are equal, so the radio
/// listens continuously.
const SCAN_INTERVAL: u16 = 0x0800;
const SCAN_WINDOW: u16 = 0x0800;

/// How long a command may go unanswered before it counts as failed.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

/// Max HCI event size: header plus 255 parameter bytes.
pub const RECV_BUFFER_SIZE: usize = 258;

/// Error returned by an envelope handler.
pub type HandlerError = Box<dyn Error + Send + Sync>;

/// LE Set Scan Parameters command parameters.
fn scan_parameters() -> [u8; 7] {
    let [interval_lo, interval_hi] = SCAN_INTERVAL.to_le_bytes();
    let [window_lo, window_hi] = SCAN_WINDOW.to_le_bytes();
    [
        LE_SCAN_PASSIVE,
        interval_lo,
        interval_hi,
        window_lo,
        window_hi,
        LE_PUBLIC_ADDRESS,
        FILTER_POLICY_ACCEPT_ALL,
    ]
}

/// LE Set Scan Enable command packet that stops scanning.
fn scan_disable_packet() -> Vec<u8> {
    hci_command_packet(OGF_LE_CTL, OCF_LE_SET_SCAN_ENABLE, &[0x00, 0x00])
}

/// Restores the saved socket filter when dropped.
struct FilterGuard<'a, C: HciChannel> {
    channel: &'a C,
    saved: HciFilter,
}

impl<C: HciChannel> Drop for FilterGuard<'_, C> {
    fn drop(&mut self) {
        match self.channel.set_filter(&self.saved) {
            Ok(()) => debug!("restored HCI filter"),
            Err(error) => warn!(%error, filter = ?self.saved, "failed to restore HCI filter"),
        }
    }
}

/// Passive scan on one HCI channel.
#[derive(Debug)]
pub struct ScanSession<'a, C: HciChannel> {
    channel: &'a C,
    scanning: bool,
}

impl<'a, C: HciChannel> ScanSession<'a, C> {
    pub fn new(channel: &'a C) -> Self {
        Self {
            channel,
            scanning: false,
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    /// Install `filter` until the returned guard is dropped.
    fn swap_filter(&self, filter: &HciFilter) -> Result<FilterGuard<'a, C>, ScanError> {
        let saved = self.channel.filter().map_err(ScanError::Filter)?;
        self.channel.set_filter(filter).map_err(ScanError::Filter)?;
        Ok(FilterGuard {
            channel: self.channel,
            saved,
        })
    }

    /// Send an LE controller command and wait for its Command Complete.
    ///
    /// With `idempotent`, Command Disallowed means the controller is already
    /// in the requested state and counts as success.
    async fn execute(
        &self,
        command: &'static str,
        ocf: u16,
        params: &[u8],
        idempotent: bool,
    ) -> Result<(), ScanError> {
        let failed = |source| ScanError::RadioCommandFailed { command, source };
        let opcode = hci_opcode(OGF_LE_CTL, ocf);
        let _restore = self.swap_filter(&HciFilter::command_complete(opcode))?;

        self.channel
            .send_command(&hci_command_packet(OGF_LE_CTL, ocf, params))
            .map_err(|error| failed(CommandFailure::Write(error)))?;

        let status = tokio::time::timeout(COMMAND_TIMEOUT, self.command_status(opcode))
            .await
            .map_err(|_| failed(CommandFailure::Timeout(COMMAND_TIMEOUT)))?
            .map_err(|error| failed(CommandFailure::Reply(error)))?;

        match status {
            HCI_SUCCESS => Ok(()),
            HCI_COMMAND_DISALLOWED if idempotent => {
                debug!(command, "controller already in requested state");
                Ok(())
            }
            status => Err(failed(CommandFailure::Status(status))),
        }
    }

    /// Status of the next Command Complete event for `opcode`.
    async fn command_status(&self, opcode: u16) -> io::Result<u8> {
        let mut buf = [0u8; RECV_BUFFER_SIZE];
        loop {
            let n = self.channel.recv(&mut buf).await?;
            match CommandComplete::parse(&buf[..n]) {
                Some(reply) if reply.opcode == opcode => return Ok(reply.status),
                _ => trace!(len = n, "ignoring event while waiting for command reply"),
            }
        }
    }

    /// Configure a passive scan accepting advertisements from any device.
    pub async fn configure_passive_scan(&self) -> Result<(), ScanError> {
        self.execute(
            "LE Set Scan Parameters",
            OCF_LE_SET_SCAN_PARAMETERS,
            &scan_parameters(),
            false,
        )
        .await
    }

    /// Enable or disable scanning.
    ///
    /// Duplicate filtering in the controller is always off: every repeat of
    /// an advertisement is delivered and the decoder drops re-broadcasts.
    /// Disabling an adapter that is not scanning succeeds.
    pub async fn set_scanning(&mut self, enabled: bool) -> Result<(), ScanError> {
        let params = [u8::from(enabled), 0x00];
        self.execute("LE Set Scan Enable", OCF_LE_SET_SCAN_ENABLE, &params, !enabled)
            .await?;
        self.scanning = enabled;
        info!(enabled, "LE scan state changed");
        Ok(())
    }

    /// Receive advertising reports until `shutdown` completes or the socket fails.
    ///
    /// Each report is handed to `on_envelope`. Handler errors are logged and
    /// do not stop the loop. `shutdown` is checked before every receive, and
    /// its completion is reported as [`ScanError::Interrupted`]. The socket
    /// filter in place before the call is restored on return.
    pub async fn receive_loop<S, F>(
        &self,
        shutdown: S,
        mut on_envelope: F,
    ) -> Result<Infallible, ScanError>
    where
        S: Future<Output = ()>,
        F: FnMut(&AdvertisingEnvelope<'_>) -> Result<(), HandlerError>,
    {
        let _restore = self.swap_filter(&HciFilter::le_meta_events())?;

        tokio::pin!(shutdown);
        let mut buf = [0u8; RECV_BUFFER_SIZE];

        loop {
            let n = tokio::select! {
                biased;
                () = &mut shutdown => {
                    info!("scan interrupted");
                    return Err(ScanError::Interrupted);
                }
                received = self.channel.recv(&mut buf) => received.map_err(ScanError::Io)?,
            };

            let parsed = match frame::parse(&buf[..n]) {
                Ok(parsed) => parsed,
                Err(error) => {
                    trace!(%error, "dropping frame");
                    continue;
                }
            };

            // The installed filter should only let LE meta events through
            if parsed.header.event != EVT_LE_META_EVENT
                || parsed.header.sub_event != EVT_LE_ADVERTISING_REPORT
            {
                trace!(
                    event = parsed.header.event,
                    sub_event = parsed.header.sub_event,
                    "dropping non advertising event"
                );
                continue;
            }

            let envelope = parsed.envelope;
            if let Err(error) = on_envelope(&envelope) {
                error!(
                    address = %envelope.address,
                    rssi = envelope.signal_strength,
                    error = %error,
                    "advertisement handler failed"
                );
            }
        }
    }
}

impl<C: HciChannel> Drop for ScanSession<'_, C> {
    /// Sends the disable command without waiting for the reply.
    fn drop(&mut self) {
        if !self.scanning {
            return;
        }
        match self.channel.send_command(&scan_disable_packet()) {
            Ok(()) => info!(enabled = false, "LE scan state changed"),
            Err(error) => warn!(%error, "failed to disable LE scan"),
        }
    }
}
