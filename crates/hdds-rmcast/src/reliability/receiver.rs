// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Receiver-side ordering buffer.
//!
//! Delivers messages strictly in id order. Packets arriving ahead of a gap
//! are held back until the gap is repaired or declared unavailable; ids the
//! sender can no longer supply are skipped and reported as
//! [`UnrecoverableGap`]s.
//!
//! # Id bookkeeping
//!
//! ```text
//!   delivered      next_deliver            expected_next
//!  ───────────────────┼───────────────────────┼──────────────>
//!                     │ held | lost | missing │  not seen yet
//! ```
//!
//! Every id in `[next_deliver, expected_next)` is exactly one of: held
//! (data received), lost (sender sent `DATA_NOT_AVAILABLE`), or missing
//! (tracked by the [`NackTracker`]).
//!
//! # Overflow
//!
//! The hold-back buffer is bounded by `receiver_buffer_size`. On overflow
//! `Hard` reliability fails the session, `Soft` reliability gives up the
//! oldest outstanding gaps until the buffer fits again.

use std::collections::BTreeMap;

use tracing::{debug, trace, warn};

use super::nack::NackTracker;
use crate::config::{JoinMode, ReliabilityMode};
use crate::error::{DefunctReason, UnrecoverableGap};
use crate::packet::{Packet, PacketId, Reassembler};

#[derive(Debug)]
enum Slot {
    Data(Packet),
    Lost,
}

/// Result of feeding one packet to [`ReceiverLogic`].
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReceiveOutcome {
    /// Messages completed, in order.
    pub delivered: Vec<Vec<u8>>,
    /// Ids passed by the delivery cursor without data.
    pub lost: Vec<UnrecoverableGap>,
    /// Size of a gap detected by this packet.
    pub new_gap: Option<u64>,
    /// A previously missing id was resolved.
    pub repaired: bool,
    /// The packet was already received or delivered.
    pub duplicate: bool,
    /// Messages dropped because one of their packets was lost.
    pub discarded_messages: u64,
}

impl ReceiveOutcome {
    fn push_lost(&mut self, begin: PacketId, end: PacketId) {
        if begin >= end {
            return;
        }
        match self.lost.last_mut() {
            Some(last) if last.end == begin => last.end = end,
            _ => self.lost.push(UnrecoverableGap::new(begin, end)),
        }
    }

    /// Total ids reported lost.
    pub fn lost_count(&self) -> u64 {
        self.lost.iter().map(UnrecoverableGap::len).sum()
    }
}

/// In-order delivery state for one remote sender.
#[derive(Debug)]
pub struct ReceiverLogic {
    capacity: usize,
    mode: ReliabilityMode,
    synced: bool,
    expected_next: PacketId,
    next_deliver: PacketId,
    held: BTreeMap<PacketId, Slot>,
    tracker: NackTracker,
    reassembler: Reassembler,
}

impl ReceiverLogic {
    pub fn new(capacity: usize, mode: ReliabilityMode, join: JoinMode) -> Self {
        Self {
            capacity: capacity.max(1),
            mode,
            synced: join == JoinMode::FromStart,
            expected_next: 0,
            next_deliver: 0,
            held: BTreeMap::new(),
            tracker: NackTracker::new(),
            reassembler: Reassembler::new(),
        }
    }

    /// Handle a `DATA_*` packet.
    pub fn on_data(&mut self, packet: Packet) -> Result<ReceiveOutcome, DefunctReason> {
        let mut outcome = ReceiveOutcome::default();
        let id = packet.id;

        if !self.synced {
            self.sync_at(id);
            // A late joiner cannot tell whether `id` starts a message.
            if id > 0 {
                self.reassembler.skip();
            }
        }

        if id < self.next_deliver {
            trace!(id, "late packet below delivery cursor");
            outcome.duplicate = true;
            return Ok(outcome);
        }

        if id >= self.expected_next {
            let Some(after) = id.checked_add(1) else {
                debug!(id, "data id out of range, dropped");
                return Ok(outcome);
            };
            if id > self.expected_next {
                self.tracker.nack_range(self.expected_next, id);
                outcome.new_gap = Some(u64::from(id - self.expected_next));
            }
            self.expected_next = after;
            self.held.insert(id, Slot::Data(packet));
        } else if self.tracker.cancel(id) {
            outcome.repaired = true;
            self.held.insert(id, Slot::Data(packet));
        } else if matches!(self.held.get(&id), Some(Slot::Lost)) {
            // Retransmission beat the delivery cursor to a skipped id.
            debug!(id, "data arrived for id marked unavailable");
            self.held.insert(id, Slot::Data(packet));
        } else {
            outcome.duplicate = true;
            return Ok(outcome);
        }

        self.finish(outcome)
    }

    /// Handle `DATA_NOT_AVAILABLE(id)`.
    pub fn on_not_available(&mut self, id: PacketId) -> Result<ReceiveOutcome, DefunctReason> {
        let mut outcome = ReceiveOutcome::default();
        if !self.synced || id < self.next_deliver {
            return Ok(outcome);
        }

        if id >= self.expected_next {
            let Some(after) = id.checked_add(1) else {
                return Ok(outcome);
            };
            if id > self.expected_next {
                self.tracker.nack_range(self.expected_next, id);
                outcome.new_gap = Some(u64::from(id - self.expected_next));
            }
            self.expected_next = after;
        } else if self.tracker.cancel(id) {
            outcome.repaired = true;
        } else {
            return Ok(outcome);
        }

        self.held.insert(id, Slot::Lost);
        self.finish(outcome)
    }

    /// Handle `HEARTBEAT(id)`: everything up to `id` should exist.
    pub fn on_heartbeat(&mut self, id: PacketId) -> ReceiveOutcome {
        let mut outcome = ReceiveOutcome::default();
        let Some(after) = id.checked_add(1) else {
            return outcome;
        };

        if !self.synced {
            // Senders emit heartbeats between whole messages.
            self.sync_at(after);
            return outcome;
        }

        if after > self.expected_next {
            self.tracker.nack_range(self.expected_next, after);
            outcome.new_gap = Some(u64::from(after - self.expected_next));
            self.expected_next = after;
        }
        outcome
    }

    /// NACKs for every outstanding interval, ascending.
    pub fn nacks(&self) -> Vec<Packet> {
        self.tracker.get_nacks()
    }

    pub fn tracker(&self) -> &NackTracker {
        &self.tracker
    }

    pub fn has_missing(&self) -> bool {
        !self.tracker.is_empty()
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// One past the highest id seen.
    pub fn expected_next(&self) -> PacketId {
        self.expected_next
    }

    /// Lowest id not yet delivered or skipped.
    pub fn next_deliver(&self) -> PacketId {
        self.next_deliver
    }

    /// Entries waiting in the hold-back buffer.
    pub fn held_count(&self) -> usize {
        self.held.len()
    }

    fn sync_at(&mut self, id: PacketId) {
        debug!(id, "receiver synchronised");
        self.synced = true;
        self.expected_next = id;
        self.next_deliver = id;
    }

    fn finish(&mut self, mut outcome: ReceiveOutcome) -> Result<ReceiveOutcome, DefunctReason> {
        let discarded_before = self.reassembler.discarded_messages();
        self.deliver_ready(&mut outcome);

        if self.held.len() > self.capacity {
            match self.mode {
                ReliabilityMode::Hard => {
                    warn!(
                        held = self.held.len(),
                        capacity = self.capacity,
                        "receive buffer overflow"
                    );
                    return Err(DefunctReason::ReceiveBufferOverflow {
                        held: self.held.len(),
                        capacity: self.capacity,
                    });
                }
                ReliabilityMode::Soft => {
                    warn!(
                        held = self.held.len(),
                        missing = self.tracker.missing_count(),
                        "receive buffer overflow, skipping oldest gaps"
                    );
                    while self.held.len() > self.capacity {
                        self.skip_oldest_gap(&mut outcome);
                    }
                }
            }
        }

        outcome.discarded_messages = self.reassembler.discarded_messages() - discarded_before;
        Ok(outcome)
    }

    /// Give up the ids below the lowest held entry, then deliver from it.
    fn skip_oldest_gap(&mut self, outcome: &mut ReceiveOutcome) {
        if let Some(&lowest) = self.held.keys().next() {
            if lowest > self.next_deliver {
                self.tracker.cancel_range(self.next_deliver, lowest);
                self.reassembler.skip();
                outcome.push_lost(self.next_deliver, lowest);
                self.next_deliver = lowest;
            }
        }
        self.deliver_ready(outcome);
    }

    fn deliver_ready(&mut self, outcome: &mut ReceiveOutcome) {
        while let Some(slot) = self.held.remove(&self.next_deliver) {
            match slot {
                Slot::Data(packet) => {
                    if let Some(message) = self.reassembler.push(packet) {
                        outcome.delivered.push(message);
                    }
                }
                Slot::Lost => {
                    self.reassembler.skip();
                    outcome.push_lost(self.next_deliver, self.next_deliver + 1);
                }
            }
            self.next_deliver += 1;
        }
    }
}
