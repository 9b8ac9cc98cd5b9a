//! Raw HCI socket access.
//!
//! This module uses raw Linux HCI sockets to control the adapter and receive
//! BLE advertisements without the BlueZ daemon. It requires CAP_NET_RAW and
//! CAP_NET_ADMIN capabilities or root privileges.

use super::{HciChannel, HciFilter, ScanError};
use libc::{AF_BLUETOOTH, SOCK_CLOEXEC, SOCK_RAW, c_int, c_void, sockaddr, socklen_t};
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use tokio::io::unix::AsyncFd;
use tracing::debug;

// HCI protocol constants
const BTPROTO_HCI: c_int = 1;
const SOL_HCI: c_int = 0;
const HCI_FILTER: c_int = 2;
const HCI_CHANNEL_RAW: u16 = 0;

// _IOW('H', 201, int) and _IOW('H', 202, int)
const HCIDEVUP: u32 = 0x400448c9;
const HCIDEVDOWN: u32 = 0x400448ca;

/// HCI socket address structure
#[repr(C)]
struct SockaddrHci {
    hci_family: u16,
    hci_dev: u16,
    hci_channel: u16,
}

/// Open a raw HCI socket
fn open_hci_socket(flags: c_int) -> io::Result<OwnedFd> {
    // nix doesn't support BTPROTO_HCI
    let fd = unsafe { libc::socket(AF_BLUETOOTH, SOCK_RAW | SOCK_CLOEXEC | flags, BTPROTO_HCI) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Bind HCI socket to a device
fn bind_hci_socket(fd: &OwnedFd, dev_id: u16) -> io::Result<()> {
    let addr = SockaddrHci {
        hci_family: AF_BLUETOOTH as u16,
        hci_dev: dev_id,
        hci_channel: HCI_CHANNEL_RAW,
    };

    let ret = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            &addr as *const SockaddrHci as *const sockaddr,
            mem::size_of::<SockaddrHci>() as socklen_t,
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Outcome of an up/down request that failed with `error`.
fn toggle_result(dev_id: u16, error: io::Error) -> Result<(), ScanError> {
    // Already in the requested state
    if error.raw_os_error() == Some(libc::EALREADY) {
        return Ok(());
    }
    Err(ScanError::RadioUnavailable {
        adapter: dev_id,
        source: error,
    })
}

fn toggle_device(dev_id: u16, request: u32) -> Result<(), ScanError> {
    let fd = open_hci_socket(0).map_err(|source| ScanError::RadioUnavailable {
        adapter: dev_id,
        source,
    })?;
    let ret = unsafe { libc::ioctl(fd.as_raw_fd(), request as _, c_int::from(dev_id)) };
    if ret < 0 {
        return toggle_result(dev_id, io::Error::last_os_error());
    }
    Ok(())
}

/// Bring adapter `hci<dev_id>` up. Succeeds if it already is.
pub fn enable(dev_id: u16) -> Result<(), ScanError> {
    debug!(adapter = dev_id, "bringing adapter up");
    toggle_device(dev_id, HCIDEVUP)
}

/// Bring adapter `hci<dev_id>` down. Succeeds if it already is.
pub fn disable(dev_id: u16) -> Result<(), ScanError> {
    debug!(adapter = dev_id, "bringing adapter down");
    toggle_device(dev_id, HCIDEVDOWN)
}

/// Open a raw HCI socket bound to adapter `hci<dev_id>`.
///
/// The socket is registered with the tokio reactor, so this must be called
/// from within a runtime.
pub fn open(dev_id: u16) -> Result<HciSocket, ScanError> {
    let unavailable = |source| ScanError::RadioUnavailable {
        adapter: dev_id,
        source,
    };

    // SOCK_NONBLOCK is required for AsyncFd to work properly
    let fd = open_hci_socket(libc::SOCK_NONBLOCK).map_err(unavailable)?;
    bind_hci_socket(&fd, dev_id).map_err(unavailable)?;
    let fd = AsyncFd::new(fd).map_err(unavailable)?;

    Ok(HciSocket { fd, dev_id })
}

/// A raw HCI socket bound to one adapter, closed on drop.
#[derive(Debug)]
pub struct HciSocket {
    fd: AsyncFd<OwnedFd>,
    dev_id: u16,
}

impl HciSocket {
    pub fn adapter(&self) -> u16 {
        self.dev_id
    }
}

impl HciChannel for HciSocket {
    fn filter(&self) -> io::Result<HciFilter> {
        let mut filter = HciFilter::new();
        let mut len = mem::size_of::<HciFilter>() as socklen_t;
        let ret = unsafe {
            libc::getsockopt(
                self.fd.as_raw_fd(),
                SOL_HCI,
                HCI_FILTER,
                &mut filter as *mut HciFilter as *mut c_void,
                &mut len,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(filter)
    }

    fn set_filter(&self, filter: &HciFilter) -> io::Result<()> {
        let ret = unsafe {
            libc::setsockopt(
                self.fd.as_raw_fd(),
                SOL_HCI,
                HCI_FILTER,
                filter as *const HciFilter as *const c_void,
                mem::size_of::<HciFilter>() as socklen_t,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn send_command(&self, packet: &[u8]) -> io::Result<()> {
        let ret = unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                packet.as_ptr() as *const c_void,
                packet.len(),
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.fd.readable().await?;

            match guard.try_io(|inner| {
                let ret = unsafe {
                    libc::read(inner.as_raw_fd(), buf.as_mut_ptr() as *mut c_void, buf.len())
                };
                if ret < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(ret as usize)
                }
            }) {
                Ok(result) => return result,
                // WouldBlock, readiness was cleared
                Err(_) => continue,
            }
        }
    }
}
