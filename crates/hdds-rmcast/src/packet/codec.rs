// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Packet wire codec.
//!
//! # Wire Format
//!
//! ```text
//! 0               1               2               3
//! +---------------+---------------+---------------+---------------+
//! |  byte order   |                   padding                     |
//! +---------------+---------------+---------------+---------------+
//! |                              id                               |
//! +---------------+---------------+---------------+---------------+
//! |                             type                              |
//! +---------------+---------------+---------------+---------------+
//! |   NACK:  begin (u32), end (u32)                               |
//! |   DATA:  length (u32), payload bytes                          |
//! +---------------------------------------------------------------+
//! ```
//!
//! The byte-order flag is `0` for big-endian and `1` for little-endian.
//! The encoder always writes the host's native order; the decoder honours
//! whatever order the sender announced.

use byteorder::{BigEndian, ByteOrder, LittleEndian, NativeEndian, ReadBytesExt};
use thiserror::Error;

use super::{Packet, PacketId, PacketKind, PacketType};

/// Fixed header: flag + padding + id + type.
pub const HEADER_LEN: usize = 12;

const FLAG_BIG_ENDIAN: u8 = 0;
const FLAG_LITTLE_ENDIAN: u8 = 1;

/// Malformed or truncated packet.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("packet truncated while reading {0}")]
    Truncated(&'static str),

    #[error("invalid byte-order flag {0:#04x}")]
    InvalidByteOrder(u8),

    #[error("unknown packet type {0}")]
    UnknownType(u32),

    #[error("invalid NACK range [{begin}, {end})")]
    InvalidNackRange { begin: PacketId, end: PacketId },

    #[error("{0} trailing bytes after packet")]
    TrailingBytes(usize),
}

fn native_flag() -> u8 {
    if cfg!(target_endian = "little") {
        FLAG_LITTLE_ENDIAN
    } else {
        FLAG_BIG_ENDIAN
    }
}

/// Exact number of bytes [`encode`] produces for `packet`.
pub fn encoded_len(packet: &Packet) -> usize {
    HEADER_LEN
        + match &packet.kind {
            PacketKind::DataIntermediate(p) | PacketKind::DataEndOfMessage(p) => 4 + p.len(),
            PacketKind::Nack { .. } => 8,
            PacketKind::Heartbeat | PacketKind::DataNotAvailable => 0,
        }
}

/// Encode a packet in native byte order.
///
/// Payloads are bounded by the UDP datagram size, so the length always
/// fits the 32-bit length field.
pub fn encode(packet: &Packet) -> Vec<u8> {
    let mut buf = vec![0u8; encoded_len(packet)];
    buf[0] = native_flag();
    NativeEndian::write_u32(&mut buf[4..8], packet.id);
    NativeEndian::write_u32(&mut buf[8..12], packet.packet_type().as_wire());

    match &packet.kind {
        PacketKind::DataIntermediate(payload) | PacketKind::DataEndOfMessage(payload) => {
            debug_assert!(u32::try_from(payload.len()).is_ok());
            NativeEndian::write_u32(&mut buf[12..16], payload.len() as u32);
            buf[16..].copy_from_slice(payload);
        }
        PacketKind::Nack { begin, end } => {
            NativeEndian::write_u32(&mut buf[12..16], *begin);
            NativeEndian::write_u32(&mut buf[16..20], *end);
        }
        PacketKind::Heartbeat | PacketKind::DataNotAvailable => {}
    }

    buf
}

/// Decode one packet occupying the whole of `buf`.
pub fn decode(buf: &[u8]) -> Result<Packet, DecodeError> {
    if buf.len() < HEADER_LEN {
        return Err(DecodeError::Truncated("header"));
    }

    match buf[0] {
        FLAG_BIG_ENDIAN => decode_with::<BigEndian>(&buf[4..]),
        FLAG_LITTLE_ENDIAN => decode_with::<LittleEndian>(&buf[4..]),
        flag => Err(DecodeError::InvalidByteOrder(flag)),
    }
}

/// Read only the type tag of a datagram, for routing before a full decode.
pub fn peek_type(buf: &[u8]) -> Result<PacketType, DecodeError> {
    if buf.len() < HEADER_LEN {
        return Err(DecodeError::Truncated("header"));
    }
    let tag = match buf[0] {
        FLAG_BIG_ENDIAN => BigEndian::read_u32(&buf[8..12]),
        FLAG_LITTLE_ENDIAN => LittleEndian::read_u32(&buf[8..12]),
        flag => return Err(DecodeError::InvalidByteOrder(flag)),
    };
    PacketType::from_wire(tag).ok_or(DecodeError::UnknownType(tag))
}

fn read_u32<B: ByteOrder>(rd: &mut &[u8], field: &'static str) -> Result<u32, DecodeError> {
    rd.read_u32::<B>()
        .map_err(|_| DecodeError::Truncated(field))
}

fn decode_with<B: ByteOrder>(mut rd: &[u8]) -> Result<Packet, DecodeError> {
    let id = read_u32::<B>(&mut rd, "id")?;
    let tag = read_u32::<B>(&mut rd, "type")?;
    let packet_type = PacketType::from_wire(tag).ok_or(DecodeError::UnknownType(tag))?;

    let kind = match packet_type {
        PacketType::DataIntermediate | PacketType::DataEndOfMessage => {
            let len = read_u32::<B>(&mut rd, "payload length")? as usize;
            // Bound-check the declared length before touching the payload.
            if rd.len() < len {
                return Err(DecodeError::Truncated("payload"));
            }
            let (payload, rest) = rd.split_at(len);
            rd = rest;
            if packet_type == PacketType::DataIntermediate {
                PacketKind::DataIntermediate(payload.to_vec())
            } else {
                PacketKind::DataEndOfMessage(payload.to_vec())
            }
        }
        PacketType::Nack => {
            let begin = read_u32::<B>(&mut rd, "nack begin")?;
            let end = read_u32::<B>(&mut rd, "nack end")?;
            if begin > end {
                return Err(DecodeError::InvalidNackRange { begin, end });
            }
            PacketKind::Nack { begin, end }
        }
        PacketType::Heartbeat => PacketKind::Heartbeat,
        PacketType::DataNotAvailable => PacketKind::DataNotAvailable,
    };

    if !rd.is_empty() {
        return Err(DecodeError::TrailingBytes(rd.len()));
    }

    Ok(Packet { id, kind })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn be_header(id: u32, tag: u32) -> Vec<u8> {
        let mut buf = vec![FLAG_BIG_ENDIAN, 0, 0, 0];
        buf.extend_from_slice(&id.to_be_bytes());
        buf.extend_from_slice(&tag.to_be_bytes());
        buf
    }

    #[test]
    fn test_roundtrip_all_kinds() {
        let packets = [
            Packet::data_intermediate(b"hello".to_vec()).with_id(1),
            Packet::data_end_of_message(b"world".to_vec()).with_id(2),
            Packet::data_end_of_message(Vec::new()).with_id(3),
            Packet::nack(4, 9),
            Packet::heartbeat(10),
            Packet::data_not_available(11),
        ];
        for p in packets {
            let bytes = encode(&p);
            assert_eq!(bytes.len(), encoded_len(&p));
            assert_eq!(decode(&bytes).expect("decode"), p);
        }
    }

    #[test]
    fn test_encode_layout() {
        let bytes = encode(&Packet::nack(5, 7));
        assert_eq!(bytes.len(), HEADER_LEN + 8);
        assert_eq!(bytes[0], native_flag());
        assert_eq!(&bytes[1..4], &[0, 0, 0]);
        assert_eq!(NativeEndian::read_u32(&bytes[4..8]), 5);
        assert_eq!(NativeEndian::read_u32(&bytes[8..12]), 2);
        assert_eq!(NativeEndian::read_u32(&bytes[12..16]), 5);
        assert_eq!(NativeEndian::read_u32(&bytes[16..20]), 7);

        let bytes = encode(&Packet::heartbeat(0));
        assert_eq!(bytes.len(), HEADER_LEN);
    }

    #[test]
    fn test_decode_foreign_byte_orders() {
        let mut big = be_header(0x0102_0304, 1);
        big.extend_from_slice(&3u32.to_be_bytes());
        big.extend_from_slice(b"xyz");
        let p = decode(&big).expect("big-endian");
        assert_eq!(p.id, 0x0102_0304);
        assert_eq!(p.kind, PacketKind::DataEndOfMessage(b"xyz".to_vec()));

        let mut little = vec![FLAG_LITTLE_ENDIAN, 0, 0, 0];
        little.extend_from_slice(&9u32.to_le_bytes());
        little.extend_from_slice(&3u32.to_le_bytes());
        assert_eq!(decode(&little).expect("little-endian"), Packet::heartbeat(9));
    }

    #[test]
    fn test_decode_rejects_short_header() {
        assert_eq!(decode(&[]), Err(DecodeError::Truncated("header")));
        assert_eq!(decode(&[0; 11]), Err(DecodeError::Truncated("header")));
    }

    #[test]
    fn test_decode_rejects_bad_flag() {
        let mut buf = be_header(1, 3);
        buf[0] = 7;
        assert_eq!(decode(&buf), Err(DecodeError::InvalidByteOrder(7)));
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        assert_eq!(decode(&be_header(1, 42)), Err(DecodeError::UnknownType(42)));
    }

    #[test]
    fn test_decode_rejects_oversized_length() {
        let mut buf = be_header(1, 0);
        buf.extend_from_slice(&u32::MAX.to_be_bytes());
        buf.extend_from_slice(b"ab");
        assert_eq!(decode(&buf), Err(DecodeError::Truncated("payload")));
    }

    #[test]
    fn test_decode_rejects_missing_length() {
        let mut buf = be_header(1, 0);
        buf.extend_from_slice(&[0, 0]);
        assert_eq!(decode(&buf), Err(DecodeError::Truncated("payload length")));
    }

    #[test]
    fn test_decode_rejects_truncated_nack() {
        let mut buf = be_header(1, 2);
        buf.extend_from_slice(&1u32.to_be_bytes());
        assert_eq!(decode(&buf), Err(DecodeError::Truncated("nack end")));
    }

    #[test]
    fn test_decode_rejects_inverted_nack() {
        let mut buf = be_header(8, 2);
        buf.extend_from_slice(&8u32.to_be_bytes());
        buf.extend_from_slice(&3u32.to_be_bytes());
        assert_eq!(
            decode(&buf),
            Err(DecodeError::InvalidNackRange { begin: 8, end: 3 })
        );
    }

    #[test]
    fn test_decode_accepts_empty_nack() {
        let mut buf = be_header(4, 2);
        buf.extend_from_slice(&4u32.to_be_bytes());
        buf.extend_from_slice(&4u32.to_be_bytes());
        assert_eq!(decode(&buf).expect("decode").nack_range(), Some(4..4));
    }

    #[test]
    fn test_peek_type() {
        let bytes = encode(&Packet::nack(1, 2));
        assert_eq!(peek_type(&bytes), Ok(PacketType::Nack));
        assert_eq!(peek_type(&be_header(0, 3)), Ok(PacketType::Heartbeat));
        assert_eq!(peek_type(&be_header(0, 9)), Err(DecodeError::UnknownType(9)));
        assert_eq!(peek_type(&bytes[..4]), Err(DecodeError::Truncated("header")));
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let mut buf = encode(&Packet::data_not_available(3));
        buf.push(0xff);
        assert_eq!(decode(&buf), Err(DecodeError::TrailingBytes(1)));
    }
}
