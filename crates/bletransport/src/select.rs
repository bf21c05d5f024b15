//! Transport selection
//!
//! Opens the one link a [`TransportConfig`] names and, optionally, brings an
//! H4 transport up on it. Nothing here retries: a failed open is returned to
//! the caller as is.

use crate::backend::{HciSocket, Link, SerialPort, StreamSocket};
use crate::config::{TransportConfig, TransportOptions};
use crate::error::{Result, TransportError};
use crate::h4::H4Transport;
use log::info;
use std::sync::Arc;

/// Open the physical link described by `config`
pub fn open_link(config: &TransportConfig) -> Result<Arc<dyn Link>> {
    info!("opening {} transport", config.kind());

    let link: Arc<dyn Link> = match config {
        TransportConfig::KernelSocket { adapter_id } => Arc::new(HciSocket::open(*adapter_id)?),
        TransportConfig::StreamSocket { address, timeout } => {
            Arc::new(StreamSocket::connect(address, *timeout)?)
        }
        TransportConfig::Serial(options) => Arc::new(SerialPort::open(options)?),
        TransportConfig::Usb {
            vendor_id,
            product_id,
        } => open_usb(*vendor_id, *product_id)?,
    };

    Ok(link)
}

#[cfg(feature = "usb")]
fn open_usb(vendor_id: u16, product_id: u16) -> Result<Arc<dyn Link>> {
    use crate::backend::UsbLink;

    Ok(Arc::new(UsbLink::open(
        vendor_id,
        product_id,
        UsbLink::DEFAULT_TIMEOUT,
    )?))
}

#[cfg(not(feature = "usb"))]
fn open_usb(_vendor_id: u16, _product_id: u16) -> Result<Arc<dyn Link>> {
    Err(TransportError::Configuration(
        "built without USB support".into(),
    ))
}

/// Open the configured link and start an H4 transport on it
///
/// The returned handle is what upper HCI layers should be constructed with.
pub fn open(config: &TransportConfig, options: TransportOptions) -> Result<H4Transport> {
    open_with(config, options, open_link)
}

/// Like [`open`], with the link produced by `connect`
///
/// Lets callers supply their own link for a configuration, such as an
/// emulated controller.
pub fn open_with<F>(config: &TransportConfig, options: TransportOptions, connect: F) -> Result<H4Transport>
where
    F: FnOnce(&TransportConfig) -> Result<Arc<dyn Link>>,
{
    if options.rx_queue_capacity == 0 || options.tx_queue_capacity == 0 {
        return Err(TransportError::Configuration(
            "queue capacities must be non-zero".into(),
        ));
    }

    let link = connect(config)?;
    H4Transport::open(link, options)
}
