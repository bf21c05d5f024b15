//! Kernel HCI socket backend
//!
//! This module opens a Bluetooth controller through the kernel's HCI user
//! channel, which hands the host exclusive, H4-framed access to the device.

use crate::backend::fd::FdLink;
use crate::backend::Link;
use crate::error::{Result, TransportError};
use log::info;
use std::time::Duration;

// Bluetooth socket constants
const AF_BLUETOOTH: i32 = 31;
const BTPROTO_HCI: i32 = 1;
const HCI_CHANNEL_USER: u16 = 1;

// _IOW('H', 202, int)
const HCIDEVDOWN: libc::c_ulong = 0x400448ca;

// Define the sockaddr_hci structure
#[repr(C)]
struct SockaddrHci {
    hci_family: libc::sa_family_t,
    hci_dev: u16,
    hci_channel: u16,
}

/// Represents an HCI user-channel socket
pub struct HciSocket {
    link: FdLink,
    dev_id: u16,
}

impl HciSocket {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

    /// Opens a new HCI socket
    ///
    /// # Arguments
    ///
    /// * `dev_id` - The device ID to open (0 for the first device)
    ///
    /// # Returns
    ///
    /// A new `HciSocket` instance or an error if the socket could not be opened
    pub fn open(dev_id: u16) -> Result<Self> {
        Self::open_with_timeout(dev_id, Self::DEFAULT_TIMEOUT)
    }

    /// Opens a new HCI socket whose reads and writes give up after `timeout`
    pub fn open_with_timeout(dev_id: u16, timeout: Duration) -> Result<Self> {
        let fd = unsafe {
            libc::socket(
                AF_BLUETOOTH,
                libc::SOCK_RAW | libc::SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
                BTPROTO_HCI,
            )
        };

        if fd < 0 {
            return Err(TransportError::Io(std::io::Error::last_os_error()));
        }

        // The user channel can only be bound while the device is down
        if unsafe { libc::ioctl(fd, HCIDEVDOWN as _, dev_id as libc::c_int) } < 0 {
            let err = std::io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(TransportError::Io(err));
        }

        let addr = SockaddrHci {
            hci_family: AF_BLUETOOTH as libc::sa_family_t,
            hci_dev: dev_id,
            hci_channel: HCI_CHANNEL_USER,
        };

        let result = unsafe {
            libc::bind(
                fd,
                &addr as *const _ as *const libc::sockaddr,
                std::mem::size_of::<SockaddrHci>() as libc::socklen_t,
            )
        };

        if result < 0 {
            let err = std::io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(TransportError::Io(err));
        }

        info!("hci{}: user channel bound", dev_id);

        Ok(HciSocket {
            link: FdLink::new("hci-socket", fd, timeout)?,
            dev_id,
        })
    }

    /// The adapter index this socket is bound to
    pub fn dev_id(&self) -> u16 {
        self.dev_id
    }
}

impl Link for HciSocket {
    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.link.read(buf)
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        self.link.write(buf)
    }

    fn close(&self) -> Result<()> {
        self.link.close()
    }
}
