//! HCI protocol constants
//!
//! This module contains constants used in the Bluetooth HCI protocol.

// H4 packet type indicators
pub const HCI_COMMAND_PKT: u8 = 0x01;
pub const HCI_ACL_PKT: u8 = 0x02;
pub const HCI_SCO_PKT: u8 = 0x03;
pub const HCI_EVENT_PKT: u8 = 0x04;

// Header sizes following the type indicator
pub const HCI_COMMAND_HDR_SIZE: usize = 3;
pub const HCI_ACL_HDR_SIZE: usize = 4;
pub const HCI_SCO_HDR_SIZE: usize = 3;
pub const HCI_EVENT_HDR_SIZE: usize = 2;

// Maximum size of HCI command parameters
pub const HCI_MAX_PARAM_LEN: usize = 255;

// Common OGF (Opcode Group Field) values
pub const OGF_LINK_CTL: u8 = 0x01;
pub const OGF_HOST_CTL: u8 = 0x03;
pub const OGF_INFO_PARAM: u8 = 0x04;
pub const OGF_LE: u8 = 0x08;

// Link Control Commands (OGF: 0x01)
pub const OCF_DISCONNECT: u16 = 0x0006;

// Host Controller Commands (OGF: 0x03)
pub const OCF_SET_EVENT_MASK: u16 = 0x0001;
pub const OCF_RESET: u16 = 0x0003;

// Informational Parameters (OGF: 0x04)
pub const OCF_READ_LOCAL_VERSION: u16 = 0x0001;
pub const OCF_READ_BD_ADDR: u16 = 0x0009;

// HCI Events
pub const EVT_DISCONN_COMPLETE: u8 = 0x05;
pub const EVT_CMD_COMPLETE: u8 = 0x0E;
pub const EVT_CMD_STATUS: u8 = 0x0F;
pub const EVT_LE_META_EVENT: u8 = 0x3E;
