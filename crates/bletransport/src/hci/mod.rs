//! Bluetooth HCI (Host Controller Interface) packet model
//!
//! This module provides the packet types carried across the transport and the
//! constants needed to frame them.

pub mod constants;
pub mod packet;


pub use packet::{HciCommand, HciEvent, HciPacket, PacketType};
