//! Error types for the bletransport library
//!
//! A single error enum covers link acquisition, byte-stream I/O, H4 framing
//! and the startup handshake.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while opening or running an HCI transport
#[derive(Error, Debug)]
pub enum TransportError {
    /// No transport variant, or more than one, was selected
    #[error("Invalid transport configuration: {0}")]
    Configuration(String),

    #[error("USB device {vendor_id:04x}:{product_id:04x} not found")]
    DeviceNotFound { vendor_id: u16, product_id: u16 },

    /// The default interface could not be claimed (device busy, permissions)
    #[cfg(feature = "usb")]
    #[error("Failed to claim USB interface: {0}")]
    Claim(rusb::Error),

    #[error("USB endpoint {address:#04x} not present on the default interface")]
    Endpoint { address: u8 },

    #[cfg(feature = "usb")]
    #[error("USB transfer failed: {0}")]
    Usb(rusb::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Link operation timed out")]
    LinkTimeout,

    #[error("Link is closed")]
    LinkClosed,

    /// The peer closed its end of the byte stream
    #[error("End of stream")]
    EndOfStream,

    /// A byte that is not an H4 packet indicator arrived where one was expected
    #[error("Unknown H4 packet type {0:#04x}")]
    Protocol(u8),

    #[error("Invalid HCI packet: {0}")]
    InvalidPacket(String),

    #[error("Transmit queue is full")]
    QueueFull,

    #[error("Controller did not go idle within {0:?} after reset")]
    ResetTimeout(Duration),

    #[error("Buffer too small: packet needs {needed} bytes, {available} available")]
    BufferTooSmall { needed: usize, available: usize },
}

impl TransportError {
    /// Returns true for a per-operation timeout on a live link
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::LinkTimeout)
    }

    /// Returns true when the link or transport has been closed locally
    pub fn is_closed(&self) -> bool {
        matches!(self, TransportError::LinkClosed)
    }
}

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;
