//! Byte-stream backends
//!
//! Every physical transport is exposed through the [`Link`] contract: blocking
//! `read`, `write` and `close`, each bounded by a timeout fixed when the link is
//! opened. The H4 layer owns exactly one reader and one writer per link.

mod fd;
pub mod serial;
pub mod socket;
pub mod stream;
#[cfg(feature = "usb")]
pub mod usb;

use crate::error::Result;
use std::sync::Arc;

pub use serial::{SerialOptions, SerialPort};
pub use socket::HciSocket;
pub use stream::StreamSocket;
#[cfg(feature = "usb")]
pub use usb::UsbLink;

/// A byte-oriented link to a Bluetooth controller
///
/// * `read` returns `Ok(0)` when the operation was cancelled by a concurrent
///   `close`. That is not an error and carries no data.
/// * A peer that hangs up surfaces as [`TransportError::EndOfStream`].
/// * An operation that sees no progress within the link timeout fails with
///   [`TransportError::LinkTimeout`].
/// * Any operation after `close` fails with [`TransportError::LinkClosed`].
///
/// `close` releases the physical resource once and unblocks any reader or
/// writer suspended on the same link. Calling it again is a no-op.
///
/// [`TransportError::EndOfStream`]: crate::error::TransportError::EndOfStream
/// [`TransportError::LinkTimeout`]: crate::error::TransportError::LinkTimeout
/// [`TransportError::LinkClosed`]: crate::error::TransportError::LinkClosed
pub trait Link: Send + Sync {
    fn read(&self, buf: &mut [u8]) -> Result<usize>;

    fn write(&self, buf: &[u8]) -> Result<usize>;

    fn close(&self) -> Result<()>;
}

impl<L: Link + ?Sized> Link for Arc<L> {
    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf)
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        (**self).write(buf)
    }

    fn close(&self) -> Result<()> {
        (**self).close()
    }
}

impl<L: Link + ?Sized> Link for Box<L> {
    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf)
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        (**self).write(buf)
    }

    fn close(&self) -> Result<()> {
        (**self).close()
    }
}

/// Write all of `buf`, retrying short writes
///
/// An H4 packet written partially would desynchronise the controller, so
/// callers that hand over whole packets go through here.
pub fn write_all<L: Link + ?Sized>(link: &L, mut buf: &[u8]) -> Result<usize> {
    let total = buf.len();
    while !buf.is_empty() {
        let n = link.write(buf)?;
        if n == 0 {
            return Err(crate::error::TransportError::LinkClosed);
        }
        buf = &buf[n..];
    }
    Ok(total)
}
