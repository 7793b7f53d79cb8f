// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reliable multicast packets.
//!
//! A [`Packet`] is the unit exchanged on the multicast group. Its kind
//! decides which fields travel with it:
//!
//! | Kind                  | Carries                 |
//! |-----------------------|-------------------------|
//! | `DataIntermediate`    | payload chunk           |
//! | `DataEndOfMessage`    | last payload chunk      |
//! | `Nack`                | half-open `[begin,end)` |
//! | `Heartbeat`           | id only                 |
//! | `DataNotAvailable`    | id only                 |
//!
//! Packets deliberately do not implement `Ord`: anything that needs an
//! ordering sorts by [`Packet::id`].

pub mod codec;
pub mod packetizer;

pub use codec::{decode, encode, encoded_len, peek_type, DecodeError, HEADER_LEN};
pub use packetizer::{packetize, Reassembler};

use std::ops::Range;

/// Sequence number of a packet within one sender's stream.
///
/// Matches the 32-bit field of the wire format.
pub type PacketId = u32;

/// Wire tag of a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum PacketType {
    DataIntermediate = 0,
    DataEndOfMessage = 1,
    Nack = 2,
    Heartbeat = 3,
    DataNotAvailable = 4,
}

impl PacketType {
    /// Map a wire tag back to a packet type.
    pub fn from_wire(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(Self::DataIntermediate),
            1 => Some(Self::DataEndOfMessage),
            2 => Some(Self::Nack),
            3 => Some(Self::Heartbeat),
            4 => Some(Self::DataNotAvailable),
            _ => None,
        }
    }

    /// Wire tag of this type.
    pub fn as_wire(self) -> u32 {
        self as u32
    }
}

/// Type-specific contents of a packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketKind {
    /// Chunk of a message that continues in the next packet.
    DataIntermediate(Vec<u8>),
    /// Final chunk of a message.
    DataEndOfMessage(Vec<u8>),
    /// Request to retransmit `[begin, end)`.
    Nack { begin: PacketId, end: PacketId },
    /// Sender announces `id` as its highest assigned id.
    Heartbeat,
    /// Sender can no longer retransmit `id`.
    DataNotAvailable,
}

/// Reliable multicast packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub id: PacketId,
    pub kind: PacketKind,
}

impl Packet {
    /// Intermediate data chunk (id assigned later by the sender history).
    pub fn data_intermediate(payload: Vec<u8>) -> Self {
        Self {
            id: 0,
            kind: PacketKind::DataIntermediate(payload),
        }
    }

    /// Final data chunk of a message (id assigned later by the sender history).
    pub fn data_end_of_message(payload: Vec<u8>) -> Self {
        Self {
            id: 0,
            kind: PacketKind::DataEndOfMessage(payload),
        }
    }

    /// Retransmission request for `[begin, end)`.
    ///
    /// The packet id mirrors `begin`.
    pub fn nack(begin: PacketId, end: PacketId) -> Self {
        Self {
            id: begin,
            kind: PacketKind::Nack { begin, end },
        }
    }

    pub fn heartbeat(id: PacketId) -> Self {
        Self {
            id,
            kind: PacketKind::Heartbeat,
        }
    }

    pub fn data_not_available(id: PacketId) -> Self {
        Self {
            id,
            kind: PacketKind::DataNotAvailable,
        }
    }

    /// Return the same packet stamped with `id`.
    pub fn with_id(mut self, id: PacketId) -> Self {
        self.id = id;
        self
    }

    /// Wire tag of this packet.
    pub fn packet_type(&self) -> PacketType {
        match self.kind {
            PacketKind::DataIntermediate(_) => PacketType::DataIntermediate,
            PacketKind::DataEndOfMessage(_) => PacketType::DataEndOfMessage,
            PacketKind::Nack { .. } => PacketType::Nack,
            PacketKind::Heartbeat => PacketType::Heartbeat,
            PacketKind::DataNotAvailable => PacketType::DataNotAvailable,
        }
    }

    /// True for both data kinds.
    pub fn is_data(&self) -> bool {
        matches!(
            self.kind,
            PacketKind::DataIntermediate(_) | PacketKind::DataEndOfMessage(_)
        )
    }

    /// True for the final chunk of a message.
    pub fn is_end_of_message(&self) -> bool {
        matches!(self.kind, PacketKind::DataEndOfMessage(_))
    }

    /// Payload of a data packet.
    pub fn payload(&self) -> Option<&[u8]> {
        match &self.kind {
            PacketKind::DataIntermediate(p) | PacketKind::DataEndOfMessage(p) => Some(p),
            _ => None,
        }
    }

    /// Requested range of a NACK packet.
    pub fn nack_range(&self) -> Option<Range<PacketId>> {
        match self.kind {
            PacketKind::Nack { begin, end } => Some(begin..end),
            _ => None,
        }
    }
}
