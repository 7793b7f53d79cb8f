// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sender-side retransmission history.
//!
//! Bounded FIFO of the most recently sent data packets. The sender stamps
//! every outgoing data packet with the next id, keeps the last
//! `capacity` of them, answers NACKs from that window and synthesizes
//! `DATA_NOT_AVAILABLE` for anything that already fell out of it.
//!
//! # Example
//!
//! ```ignore
//! let mut history = SenderHistory::new(3);
//! for _ in 0..4 {
//!     history.send(Packet::data_end_of_message(vec![0]));
//! }
//! // id 0 evicted, ids 1..=3 retained
//! let replies = history.receive(&Packet::nack(0, 4));
//! assert_eq!(replies[0], Packet::data_not_available(0));
//! ```

use std::collections::VecDeque;

use tracing::{error, trace};

use crate::packet::{Packet, PacketId};

/// Bounded retransmission buffer for one sender.
#[derive(Debug)]
pub struct SenderHistory {
    /// Retained packets, oldest first. `ring[i].id == oldest_id + i`.
    ring: VecDeque<Packet>,
    capacity: usize,
    next_id: PacketId,
}

impl SenderHistory {
    /// Create an empty history retaining at most `capacity` packets (min 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ring: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
            next_id: 0,
        }
    }

    /// Stamp and record an outgoing data packet.
    ///
    /// Returns the stamped packet to transmit. Non-data packets are ignored
    /// (empty result), as is any packet once the id space is exhausted.
    pub fn send(&mut self, packet: Packet) -> Vec<Packet> {
        if !packet.is_data() {
            return Vec::new();
        }
        if self.is_exhausted() {
            error!(next_id = self.next_id, "sender id space exhausted, dropping packet");
            return Vec::new();
        }

        let packet = packet.with_id(self.next_id);
        self.next_id += 1;

        if self.ring.len() == self.capacity {
            if let Some(evicted) = self.ring.pop_front() {
                trace!(id = evicted.id, "evicted from sender history");
            }
        }
        self.ring.push_back(packet.clone());

        vec![packet]
    }

    /// Answer a NACK with one packet per requested id, ascending.
    ///
    /// Ids still retained are returned as stored; all others become
    /// `DATA_NOT_AVAILABLE`. Non-NACK packets yield an empty result.
    pub fn receive(&self, packet: &Packet) -> Vec<Packet> {
        let Some(range) = packet.nack_range() else {
            return Vec::new();
        };

        range
            .map(|id| {
                self.get(id)
                    .cloned()
                    .unwrap_or_else(|| Packet::data_not_available(id))
            })
            .collect()
    }

    /// Heartbeat announcing the highest id sent so far.
    ///
    /// `None` until the first data packet went out.
    pub fn make_heartbeat(&self) -> Option<Packet> {
        self.next_id.checked_sub(1).map(Packet::heartbeat)
    }

    /// Retained packet with `id`, if any.
    pub fn get(&self, id: PacketId) -> Option<&Packet> {
        let oldest = self.oldest_id()?;
        let offset = id.checked_sub(oldest)? as usize;
        self.ring.get(offset)
    }

    /// Lowest retained id.
    pub fn oldest_id(&self) -> Option<PacketId> {
        self.ring.front().map(|p| p.id)
    }

    /// Id the next data packet will receive.
    pub fn next_id(&self) -> PacketId {
        self.next_id
    }

    /// True once no further ids can be assigned.
    pub fn is_exhausted(&self) -> bool {
        self.next_id == PacketId::MAX
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PacketKind;

    fn data(byte: u8) -> Packet {
        Packet::data_end_of_message(vec![byte])
    }

    #[test]
    fn test_ids_increase_from_zero() {
        let mut h = SenderHistory::new(8);
        for expected in 0..5 {
            let out = h.send(data(expected as u8));
            assert_eq!(out.len(), 1);
            assert_eq!(out[0].id, expected);
        }
        assert_eq!(h.next_id(), 5);
    }

    #[test]
    fn test_non_data_send_is_noop() {
        let mut h = SenderHistory::new(4);
        assert!(h.send(Packet::heartbeat(3)).is_empty());
        assert!(h.send(Packet::nack(0, 2)).is_empty());
        assert_eq!(h.next_id(), 0);
        assert!(h.is_empty());
    }

    #[test]
    fn test_eviction_and_not_available() {
        let mut h = SenderHistory::new(3);
        for i in 0..4 {
            h.send(data(i));
        }
        assert_eq!(h.len(), 3);
        assert_eq!(h.oldest_id(), Some(1));

        let out = h.receive(&Packet::nack(0, 4));
        assert_eq!(out.len(), 4);
        assert_eq!(out[0], Packet::data_not_available(0));
        for (i, p) in out.iter().enumerate().skip(1) {
            assert_eq!(p.id, i as u32);
            assert_eq!(p.kind, PacketKind::DataEndOfMessage(vec![i as u8]));
        }
    }

    #[test]
    fn test_history_never_exceeds_capacity() {
        let mut h = SenderHistory::new(5);
        for i in 0..50u32 {
            h.send(data(i as u8));
            assert!(h.len() <= 5);
            if i >= 5 {
                // the id `capacity` behind the newest is gone
                assert!(h.get(i - 5).is_none());
                assert!(h.get(i - 4).is_some());
            }
        }
    }

    #[test]
    fn test_receive_returns_exact_count() {
        let mut h = SenderHistory::new(2);
        for i in 0..3 {
            h.send(data(i));
        }
        let out = h.receive(&Packet::nack(0, 6));
        assert_eq!(out.len(), 6);
        let ids: Vec<_> = out.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4, 5]);
        assert!(out[0].kind == PacketKind::DataNotAvailable);
        assert!(out[1].is_data());
        assert!(out[2].is_data());
        assert!(out[3..].iter().all(|p| p.kind == PacketKind::DataNotAvailable));
    }

    #[test]
    fn test_receive_ignores_non_nack() {
        let mut h = SenderHistory::new(2);
        h.send(data(0));
        assert!(h.receive(&Packet::heartbeat(0)).is_empty());
        assert!(h.receive(&Packet::nack(0, 0)).is_empty());
    }

    #[test]
    fn test_heartbeat() {
        let mut h = SenderHistory::new(4);
        assert_eq!(h.make_heartbeat(), None);
        for i in 0..5 {
            h.send(data(i));
        }
        assert_eq!(h.make_heartbeat(), Some(Packet::heartbeat(4)));
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let mut h = SenderHistory::new(0);
        h.send(data(0));
        h.send(data(1));
        assert_eq!(h.capacity(), 1);
        assert_eq!(h.len(), 1);
        assert_eq!(h.oldest_id(), Some(1));
    }
}
