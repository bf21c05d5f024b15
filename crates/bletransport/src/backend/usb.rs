//! USB bulk-endpoint backend
//!
//! H4 traffic tunnelled over a vendor-specific USB interface: bulk IN
//! endpoint 0x81 carries controller-to-host bytes, bulk OUT endpoint 0x01
//! host-to-controller bytes. The vendor/product pair implies that layout.

use crate::backend::Link;
use crate::error::{Result, TransportError};
use log::{debug, info, trace, warn};
use rusb::{Context, DeviceHandle, TransferType, UsbContext};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

pub const BULK_IN_ENDPOINT: u8 = 0x81;
pub const BULK_OUT_ENDPOINT: u8 = 0x01;

const DEFAULT_INTERFACE: u8 = 0;

// Transfers are issued in slices so close can interrupt a pending read
const TRANSFER_SLICE: Duration = Duration::from_millis(50);

struct Claimed {
    handle: DeviceHandle<Context>,
    interface: u8,
    in_packet_size: usize,
}

/// Length of a single bulk-IN transfer
///
/// A timed-out transfer reports no byte count, so a read never asks for more
/// than one USB packet: every packet the device sends completes a transfer.
fn transfer_len(buf_len: usize, max_packet_size: usize) -> usize {
    if max_packet_size == 0 {
        buf_len
    } else {
        buf_len.min(max_packet_size)
    }
}

/// A claimed USB interface with its bulk endpoints
pub struct UsbLink {
    claimed: RwLock<Option<Claimed>>,
    closing: AtomicBool,
    timeout: Duration,
    vendor_id: u16,
    product_id: u16,
}

impl UsbLink {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

    /// Open the first device matching `vendor_id`/`product_id`
    ///
    /// Any bound kernel driver is detached while the interface is claimed and
    /// reattached when it is released. Partially acquired resources are
    /// released before an error is returned.
    pub fn open(vendor_id: u16, product_id: u16, timeout: Duration) -> Result<Self> {
        debug!("opening usb {:04x}:{:04x}", vendor_id, product_id);

        let context = Context::new().map_err(TransportError::Usb)?;
        let mut handle = context
            .open_device_with_vid_pid(vendor_id, product_id)
            .ok_or(TransportError::DeviceNotFound {
                vendor_id,
                product_id,
            })?;

        // Dropping `handle` on any early return closes the device
        handle
            .set_auto_detach_kernel_driver(true)
            .map_err(TransportError::Usb)?;

        handle
            .claim_interface(DEFAULT_INTERFACE)
            .map_err(TransportError::Claim)?;

        let in_packet_size = match check_endpoints(&handle) {
            Ok(size) => size,
            Err(e) => {
                let _ = handle.release_interface(DEFAULT_INTERFACE);
                return Err(e);
            }
        };

        info!(
            "usb {:04x}:{:04x}: interface {} claimed, bulk-in packet size {}",
            vendor_id, product_id, DEFAULT_INTERFACE, in_packet_size
        );

        Ok(UsbLink {
            claimed: RwLock::new(Some(Claimed {
                handle,
                interface: DEFAULT_INTERFACE,
                in_packet_size,
            })),
            closing: AtomicBool::new(false),
            timeout,
            vendor_id,
            product_id,
        })
    }

    pub fn vendor_id(&self) -> u16 {
        self.vendor_id
    }

    pub fn product_id(&self) -> u16 {
        self.product_id
    }
}

/// Verify both bulk endpoints and return the bulk-IN max packet size
fn check_endpoints(handle: &DeviceHandle<Context>) -> Result<usize> {
    let config = handle
        .device()
        .active_config_descriptor()
        .map_err(TransportError::Usb)?;

    let mut found_in = None;
    let mut found_out = false;

    for interface in config.interfaces() {
        if interface.number() != DEFAULT_INTERFACE {
            continue;
        }
        for descriptor in interface.descriptors() {
            if descriptor.setting_number() != 0 {
                continue;
            }
            for endpoint in descriptor.endpoint_descriptors() {
                if endpoint.transfer_type() != TransferType::Bulk {
                    continue;
                }
                match endpoint.address() {
                    BULK_IN_ENDPOINT => found_in = Some(endpoint.max_packet_size() as usize),
                    BULK_OUT_ENDPOINT => found_out = true,
                    _ => {}
                }
            }
        }
    }

    let in_packet_size = found_in.ok_or(TransportError::Endpoint {
        address: BULK_IN_ENDPOINT,
    })?;
    if !found_out {
        return Err(TransportError::Endpoint {
            address: BULK_OUT_ENDPOINT,
        });
    }
    Ok(in_packet_size)
}

impl Link for UsbLink {
    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let guard = self.claimed.read().unwrap_or_else(PoisonError::into_inner);
        let claimed = guard.as_ref().ok_or(TransportError::LinkClosed)?;
        let started = Instant::now();
        let len = transfer_len(buf.len(), claimed.in_packet_size);

        loop {
            if self.closing.load(Ordering::Acquire) {
                return Ok(0);
            }

            let remaining = self.timeout.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                return Err(TransportError::LinkTimeout);
            }

            match claimed
                .handle
                .read_bulk(BULK_IN_ENDPOINT, &mut buf[..len], remaining.min(TRANSFER_SLICE))
            {
                Ok(n) => {
                    trace!("usb: read {}", hex::encode(&buf[..n]));
                    return Ok(n);
                }
                Err(rusb::Error::Timeout) => continue,
                // Cancelled transfer: no data, not an error
                Err(rusb::Error::Interrupted) => return Ok(0),
                Err(e) => return Err(TransportError::Usb(e)),
            }
        }
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        let guard = self.claimed.read().unwrap_or_else(PoisonError::into_inner);
        let claimed = guard.as_ref().ok_or(TransportError::LinkClosed)?;

        trace!("usb: write {}", hex::encode(buf));

        match claimed.handle.write_bulk(BULK_OUT_ENDPOINT, buf, self.timeout) {
            Ok(n) => Ok(n),
            Err(rusb::Error::Timeout) => Err(TransportError::LinkTimeout),
            Err(rusb::Error::Interrupted) => Ok(0),
            Err(e) => Err(TransportError::Usb(e)),
        }
    }

    fn close(&self) -> Result<()> {
        if self.closing.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        // A pending read gives up within one transfer slice
        let mut guard = self.claimed.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(claimed) = guard.take() {
            let Claimed {
                mut handle,
                interface,
                ..
            } = claimed;
            if let Err(e) = handle.release_interface(interface) {
                warn!("usb: releasing interface {}: {}", interface, e);
            }
            drop(handle);
            info!("usb {:04x}:{:04x}: closed", self.vendor_id, self.product_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_len_is_one_packet() {
        assert_eq!(transfer_len(2048, 64), 64);
        assert_eq!(transfer_len(2048, 512), 512);
        assert_eq!(transfer_len(32, 64), 32);
        assert_eq!(transfer_len(2048, 0), 2048);
    }
}
