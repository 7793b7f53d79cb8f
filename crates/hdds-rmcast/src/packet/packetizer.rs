// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message fragmentation and reassembly.
//!
//! A message is carried by zero or more `DATA_INTERMEDIATE` packets followed
//! by exactly one `DATA_END_OF_MESSAGE`. An empty message is a single empty
//! `DATA_END_OF_MESSAGE`.

use super::{Packet, PacketKind};

/// Split `message` into data packets of at most `max_payload_size` bytes.
///
/// Ids are left at 0; the sender history stamps them.
pub fn packetize(message: &[u8], max_payload_size: usize) -> Vec<Packet> {
    let chunk = max_payload_size.max(1);
    if message.is_empty() {
        return vec![Packet::data_end_of_message(Vec::new())];
    }

    let count = message.len().div_ceil(chunk);
    message
        .chunks(chunk)
        .enumerate()
        .map(|(i, part)| {
            if i + 1 == count {
                Packet::data_end_of_message(part.to_vec())
            } else {
                Packet::data_intermediate(part.to_vec())
            }
        })
        .collect()
}

/// Rebuilds messages from in-order data packets.
///
/// After a skipped id the reassembler cannot tell which message the lost
/// packet belonged to, so it drops the partial message and everything up to
/// and including the next end-of-message.
#[derive(Debug, Default)]
pub struct Reassembler {
    partial: Vec<u8>,
    discarding: bool,
    discarded_messages: u64,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next in-order data packet; returns a completed message.
    pub fn push(&mut self, packet: Packet) -> Option<Vec<u8>> {
        let (payload, end) = match packet.kind {
            PacketKind::DataIntermediate(p) => (p, false),
            PacketKind::DataEndOfMessage(p) => (p, true),
            _ => return None,
        };

        if self.discarding {
            if end {
                self.discarding = false;
                self.discarded_messages += 1;
            }
            return None;
        }

        if !end {
            self.partial.extend_from_slice(&payload);
            return None;
        }

        if self.partial.is_empty() {
            Some(payload)
        } else {
            let mut message = std::mem::take(&mut self.partial);
            message.extend_from_slice(&payload);
            Some(message)
        }
    }

    /// Note that the next id in sequence will never arrive.
    pub fn skip(&mut self) {
        self.partial.clear();
        self.discarding = true;
    }

    /// Number of messages dropped because one of their packets was lost.
    pub fn discarded_messages(&self) -> u64 {
        self.discarded_messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packetize_empty_message() {
        let packets = packetize(&[], 16);
        assert_eq!(packets.len(), 1);
        assert!(packets[0].is_end_of_message());
        assert_eq!(packets[0].payload(), Some(&[][..]));
    }

    #[test]
    fn test_packetize_exact_multiple() {
        let packets = packetize(&[7u8; 32], 16);
        assert_eq!(packets.len(), 2);
        assert!(!packets[0].is_end_of_message());
        assert!(packets[1].is_end_of_message());
        assert!(packets.iter().all(|p| p.payload().map(<[u8]>::len) == Some(16)));
    }

    #[test]
    fn test_packetize_remainder() {
        let message: Vec<u8> = (0..40).collect();
        let packets = packetize(&message, 16);
        let sizes: Vec<_> = packets
            .iter()
            .filter_map(|p| p.payload().map(<[u8]>::len))
            .collect();
        assert_eq!(sizes, vec![16, 16, 8]);
    }

    #[test]
    fn test_reassemble_multi_packet_message() {
        let message: Vec<u8> = (0..100).collect();
        let mut r = Reassembler::new();
        let mut out = Vec::new();
        for p in packetize(&message, 30) {
            out.extend(r.push(p));
        }
        assert_eq!(out, vec![message]);
    }

    #[test]
    fn test_skip_discards_through_next_end() {
        let mut r = Reassembler::new();
        assert_eq!(r.push(Packet::data_intermediate(b"ab".to_vec())), None);
        r.skip();
        assert_eq!(r.push(Packet::data_intermediate(b"cd".to_vec())), None);
        assert_eq!(r.push(Packet::data_end_of_message(b"ef".to_vec())), None);
        assert_eq!(r.discarded_messages(), 1);

        let msg = r.push(Packet::data_end_of_message(b"next".to_vec()));
        assert_eq!(msg, Some(b"next".to_vec()));
    }

    #[test]
    fn test_ignores_control_packets() {
        let mut r = Reassembler::new();
        assert_eq!(r.push(Packet::heartbeat(3)), None);
        assert_eq!(r.push(Packet::nack(0, 2)), None);
        assert_eq!(r.discarded_messages(), 0);
    }
}
