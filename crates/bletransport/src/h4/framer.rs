//! H4 packet reassembly
//!
//! Bytes arrive in arbitrary chunks. The framer tracks how far into the
//! current packet it is and yields a packet only once the full payload its
//! header declares has been collected.

use crate::config::DesyncPolicy;
use crate::error::Result;
use crate::hci::{HciPacket, PacketType};
use log::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitingType,
    AwaitingHeader { packet_type: PacketType, needed: usize },
    AwaitingPayload { packet_type: PacketType, needed: usize },
}

/// Incremental H4 decoder
#[derive(Debug)]
pub struct H4Framer {
    state: State,
    header: Vec<u8>,
    payload: Vec<u8>,
    policy: DesyncPolicy,
    skipped: u64,
}

impl Default for H4Framer {
    fn default() -> Self {
        Self::new()
    }
}

impl H4Framer {
    pub fn new() -> Self {
        Self::with_policy(DesyncPolicy::Fail)
    }

    pub fn with_policy(policy: DesyncPolicy) -> Self {
        Self {
            state: State::AwaitingType,
            header: Vec::with_capacity(4),
            payload: Vec::new(),
            policy,
            skipped: 0,
        }
    }

    /// Consume bytes from the front of `input` until a packet completes
    ///
    /// Returns `Ok(None)` once `input` is exhausted without completing a
    /// packet; the partial packet is kept for the next call. Call repeatedly
    /// until `Ok(None)` to drain a chunk holding several packets.
    ///
    /// An unknown type indicator fails with `TransportError::Protocol`
    /// under [`DesyncPolicy::Fail`]. Bytes before it that completed packets
    /// have already been returned by earlier calls.
    pub fn advance(&mut self, input: &mut &[u8]) -> Result<Option<HciPacket>> {
        loop {
            if let State::AwaitingPayload {
                packet_type,
                needed: 0,
            } = self.state
            {
                self.state = State::AwaitingType;
                let payload = std::mem::take(&mut self.payload);
                return Ok(Some(HciPacket::from_parts(
                    packet_type,
                    &self.header,
                    payload,
                )));
            }

            if input.is_empty() {
                return Ok(None);
            }

            match self.state {
                State::AwaitingType => {
                    let indicator = input[0];
                    *input = &input[1..];

                    match PacketType::try_from(indicator) {
                        Ok(packet_type) => {
                            self.header.clear();
                            self.state = State::AwaitingHeader {
                                packet_type,
                                needed: packet_type.header_len(),
                            };
                        }
                        Err(e) => match self.policy {
                            DesyncPolicy::Fail => return Err(e),
                            DesyncPolicy::SkipByte => {
                                self.skipped += 1;
                                warn!("h4: skipping unknown packet type {:#04x}", indicator);
                            }
                        },
                    }
                }
                State::AwaitingHeader {
                    packet_type,
                    needed,
                } => {
                    let take = needed.min(input.len());
                    self.header.extend_from_slice(&input[..take]);
                    *input = &input[take..];

                    self.state = if take == needed {
                        let len = packet_type.payload_len(&self.header);
                        self.payload = Vec::with_capacity(len);
                        State::AwaitingPayload {
                            packet_type,
                            needed: len,
                        }
                    } else {
                        State::AwaitingHeader {
                            packet_type,
                            needed: needed - take,
                        }
                    };
                }
                State::AwaitingPayload {
                    packet_type,
                    needed,
                } => {
                    let take = needed.min(input.len());
                    self.payload.extend_from_slice(&input[..take]);
                    *input = &input[take..];

                    self.state = State::AwaitingPayload {
                        packet_type,
                        needed: needed - take,
                    };
                }
            }
        }
    }

    /// Decode every packet completed by `data`
    ///
    /// Convenience over [`advance`](Self::advance) for callers that do not
    /// need to hand packets off one at a time.
    pub fn feed(&mut self, mut data: &[u8]) -> Result<Vec<HciPacket>> {
        let mut packets = Vec::new();
        while let Some(packet) = self.advance(&mut data)? {
            packets.push(packet);
        }
        Ok(packets)
    }

    /// True when no partial packet is buffered
    pub fn is_idle(&self) -> bool {
        self.state == State::AwaitingType
    }

    /// Type of the partially assembled packet, with bytes consumed and
    /// bytes expected after the type indicator
    pub fn pending(&self) -> Option<(PacketType, usize, usize)> {
        match self.state {
            State::AwaitingType => None,
            State::AwaitingHeader {
                packet_type,
                needed,
            } => Some((packet_type, self.header.len(), self.header.len() + needed)),
            State::AwaitingPayload {
                packet_type,
                needed,
            } => {
                let consumed = self.header.len() + self.payload.len();
                Some((packet_type, consumed, consumed + needed))
            }
        }
    }

    /// Number of bytes dropped under [`DesyncPolicy::SkipByte`]
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Discard any partial packet
    pub fn reset(&mut self) {
        self.state = State::AwaitingType;
        self.header.clear();
        self.payload.clear();
    }
}
