//! bletransport - HCI transport layer for Bluetooth LE hosts
//!
//! This library moves complete HCI packets between a host stack and a
//! Bluetooth controller over whichever physical link the controller sits
//! behind: the kernel HCI user channel, a TCP or Unix stream socket, a UART,
//! or USB bulk endpoints. Raw bytes are framed with the H4 protocol.
//!
//! ```no_run
//! use bletransport::{open, TransportOptions, TransportSelection};
//!
//! let config = TransportSelection::new().kernel_socket(0).build()?;
//! let transport = open(&config, TransportOptions::default())?;
//! let packet = transport.recv()?;
//! println!("{:?}", packet);
//! # Ok::<(), bletransport::TransportError>(())
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod h4;
pub mod hci;
pub mod select;

#[cfg(test)]
mod testing;

// Re-export common types for convenience
pub use backend::Link;
pub use config::{
    DesyncPolicy, HandshakeOptions, QueueFullPolicy, TransportConfig, TransportOptions,
    TransportSelection,
};
pub use error::{Result, TransportError};
pub use h4::{H4Framer, H4Transport};
pub use hci::{HciCommand, HciEvent, HciPacket, PacketType};
pub use select::{open, open_link, open_with};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_kernel_adapter() {
        // Fails without Bluetooth support, without privileges, or because
        // no such adapter exists; never opens a real controller
        let config = TransportSelection::new().kernel_socket(0x7ff0).build().unwrap();
        assert!(open_link(&config).is_err());
    }
}
