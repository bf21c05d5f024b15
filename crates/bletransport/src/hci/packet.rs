//! HCI packet structures and parsing
//!
//! This module contains the H4-level packet model: a one-byte type indicator
//! followed by a type-specific header carrying the payload length.

use crate::error::{Result, TransportError};
use crate::hci::constants::*;
use byteorder::{ByteOrder, LittleEndian};

/// H4 packet type indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Command = HCI_COMMAND_PKT,
    AclData = HCI_ACL_PKT,
    SyncData = HCI_SCO_PKT,
    Event = HCI_EVENT_PKT,
}

impl PacketType {
    /// Size of the fixed header that follows the type indicator
    pub fn header_len(self) -> usize {
        match self {
            PacketType::Command => HCI_COMMAND_HDR_SIZE,
            PacketType::AclData => HCI_ACL_HDR_SIZE,
            PacketType::SyncData => HCI_SCO_HDR_SIZE,
            PacketType::Event => HCI_EVENT_HDR_SIZE,
        }
    }

    /// Payload length declared by a complete header of this type
    ///
    /// `header` must hold at least `header_len()` bytes.
    pub fn payload_len(self, header: &[u8]) -> usize {
        match self {
            PacketType::Command | PacketType::SyncData => header[2] as usize,
            PacketType::AclData => LittleEndian::read_u16(&header[2..4]) as usize,
            PacketType::Event => header[1] as usize,
        }
    }
}

impl TryFrom<u8> for PacketType {
    type Error = TransportError;

    fn try_from(raw: u8) -> Result<Self> {
        match raw {
            HCI_COMMAND_PKT => Ok(PacketType::Command),
            HCI_ACL_PKT => Ok(PacketType::AclData),
            HCI_SCO_PKT => Ok(PacketType::SyncData),
            HCI_EVENT_PKT => Ok(PacketType::Event),
            other => Err(TransportError::Protocol(other)),
        }
    }
}

impl From<PacketType> for u8 {
    fn from(packet_type: PacketType) -> u8 {
        packet_type as u8
    }
}

/// A complete HCI packet
///
/// The `handle` of data packets is the raw 16-bit header field, flags included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HciPacket {
    Command { opcode: u16, parameters: Vec<u8> },
    AclData { handle: u16, data: Vec<u8> },
    SyncData { handle: u16, data: Vec<u8> },
    Event { event_code: u8, parameters: Vec<u8> },
}

impl HciPacket {
    pub fn packet_type(&self) -> PacketType {
        match self {
            HciPacket::Command { .. } => PacketType::Command,
            HciPacket::AclData { .. } => PacketType::AclData,
            HciPacket::SyncData { .. } => PacketType::SyncData,
            HciPacket::Event { .. } => PacketType::Event,
        }
    }

    /// The payload following the header
    pub fn payload(&self) -> &[u8] {
        match self {
            HciPacket::Command { parameters, .. } | HciPacket::Event { parameters, .. } => parameters,
            HciPacket::AclData { data, .. } | HciPacket::SyncData { data, .. } => data,
        }
    }

    /// Number of bytes this packet occupies on an H4 link
    pub fn wire_len(&self) -> usize {
        1 + self.packet_type().header_len() + self.payload().len()
    }

    /// Build a packet from a complete header and its payload
    ///
    /// The caller guarantees `header` has the type's header length and
    /// `payload` the length that header declares.
    pub(crate) fn from_parts(packet_type: PacketType, header: &[u8], payload: Vec<u8>) -> Self {
        match packet_type {
            PacketType::Command => HciPacket::Command {
                opcode: LittleEndian::read_u16(&header[0..2]),
                parameters: payload,
            },
            PacketType::AclData => HciPacket::AclData {
                handle: LittleEndian::read_u16(&header[0..2]),
                data: payload,
            },
            PacketType::SyncData => HciPacket::SyncData {
                handle: LittleEndian::read_u16(&header[0..2]),
                data: payload,
            },
            PacketType::Event => HciPacket::Event {
                event_code: header[0],
                parameters: payload,
            },
        }
    }

    /// Parse exactly one H4 packet from `bytes`
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (&indicator, rest) = bytes
            .split_first()
            .ok_or_else(|| TransportError::InvalidPacket("empty packet".into()))?;
        let packet_type = PacketType::try_from(indicator)?;
        let header_len = packet_type.header_len();

        if rest.len() < header_len {
            return Err(TransportError::InvalidPacket(format!(
                "{:?} header needs {} bytes, got {}",
                packet_type,
                header_len,
                rest.len()
            )));
        }

        let (header, payload) = rest.split_at(header_len);
        let declared = packet_type.payload_len(header);
        if payload.len() != declared {
            return Err(TransportError::InvalidPacket(format!(
                "{:?} declares {} payload bytes, got {}",
                packet_type,
                declared,
                payload.len()
            )));
        }

        Ok(Self::from_parts(packet_type, header, payload.to_vec()))
    }

    /// Serialize the packet into its H4 wire form
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let payload = self.payload();
        let mut packet = Vec::with_capacity(self.wire_len());
        packet.push(self.packet_type().into());

        match self {
            HciPacket::Command { opcode, .. } => {
                packet.extend_from_slice(&opcode.to_le_bytes());
                packet.push(short_len(payload, "command parameters")?);
            }
            HciPacket::AclData { handle, .. } => {
                let len = u16::try_from(payload.len()).map_err(|_| {
                    TransportError::InvalidPacket(format!("ACL payload of {} bytes", payload.len()))
                })?;
                packet.extend_from_slice(&handle.to_le_bytes());
                packet.extend_from_slice(&len.to_le_bytes());
            }
            HciPacket::SyncData { handle, .. } => {
                packet.extend_from_slice(&handle.to_le_bytes());
                packet.push(short_len(payload, "sync payload")?);
            }
            HciPacket::Event { event_code, .. } => {
                packet.push(*event_code);
                packet.push(short_len(payload, "event parameters")?);
            }
        }

        packet.extend_from_slice(payload);
        Ok(packet)
    }

    /// View this packet as an event, if it is one
    pub fn as_event(&self) -> Option<HciEvent> {
        match self {
            HciPacket::Event { event_code, parameters } => Some(HciEvent {
                event_code: *event_code,
                parameter_total_length: parameters.len() as u8,
                parameters: parameters.clone(),
            }),
            _ => None,
        }
    }
}

fn short_len(payload: &[u8], what: &str) -> Result<u8> {
    u8::try_from(payload.len())
        .map_err(|_| TransportError::InvalidPacket(format!("{} of {} bytes", what, payload.len())))
}

impl From<HciCommand> for HciPacket {
    fn from(command: HciCommand) -> Self {
        HciPacket::Command {
            opcode: command.opcode(),
            parameters: command.parameters(),
        }
    }
}

/// Controller commands issued by the transport and its callers
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum HciCommand {
    Reset,
    SetEventMask { event_mask: u64 },
    /// Any other command, by opcode group/command field
    Raw { ogf: u8, ocf: u16, parameters: Vec<u8> },
}

impl HciCommand {
    /// Create a command from its OGF/OCF and raw parameters
    pub fn new(ogf: u8, ocf: u16, parameters: Vec<u8>) -> Self {
        Self::Raw { ogf, ocf, parameters }
    }

    /// Get the OGF and OCF for this command
    pub fn opcode_parts(&self) -> (u8, u16) {
        match self {
            Self::Reset => (OGF_HOST_CTL, OCF_RESET),
            Self::SetEventMask { .. } => (OGF_HOST_CTL, OCF_SET_EVENT_MASK),
            Self::Raw { ogf, ocf, .. } => (*ogf, *ocf),
        }
    }

    pub fn opcode(&self) -> u16 {
        let (ogf, ocf) = self.opcode_parts();
        opcode(ogf, ocf)
    }

    fn parameters(&self) -> Vec<u8> {
        match self {
            Self::Reset => vec![],
            Self::SetEventMask { event_mask } => event_mask.to_le_bytes().to_vec(),
            Self::Raw { parameters, .. } => parameters.clone(),
        }
    }

    /// Convert the command to a raw H4 command packet
    ///
    /// Fails with `InvalidPacket` if the parameters exceed the 255-byte HCI
    /// limit.
    pub fn to_packet(&self) -> Result<Vec<u8>> {
        let params = self.parameters();
        if params.len() > HCI_MAX_PARAM_LEN {
            return Err(TransportError::InvalidPacket(format!(
                "command {:#06x} with {} parameter bytes",
                self.opcode(),
                params.len()
            )));
        }

        let mut packet = vec![HCI_COMMAND_PKT];
        packet.extend_from_slice(&self.opcode().to_le_bytes());
        packet.push(params.len() as u8);
        packet.extend_from_slice(&params);
        Ok(packet)
    }
}

/// Combine OGF and OCF into a 16-bit opcode
pub fn opcode(ogf: u8, ocf: u16) -> u16 {
    ((ogf as u16) << 10) | (ocf & 0x3ff)
}

/// HCI Event packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HciEvent {
    pub event_code: u8,
    pub parameter_total_length: u8,
    pub parameters: Vec<u8>,
}

impl HciEvent {
    /// Whether this is a Command Complete for the given command
    pub fn is_command_complete(&self, ogf: u8, ocf: u16) -> bool {
        self.event_code == EVT_CMD_COMPLETE
            && self.parameters.len() >= 3
            && LittleEndian::read_u16(&self.parameters[1..3]) == opcode(ogf, ocf)
    }

    /// Status byte of a Command Complete or Command Status event
    ///
    /// Returns `0xFF` for events that carry no status in a known position.
    pub fn status(&self) -> u8 {
        match self.event_code {
            EVT_CMD_COMPLETE => self.parameters.get(3).copied().unwrap_or(0xFF),
            EVT_CMD_STATUS | EVT_DISCONN_COMPLETE => self.parameters.first().copied().unwrap_or(0xFF),
            _ => 0xFF,
        }
    }
}
