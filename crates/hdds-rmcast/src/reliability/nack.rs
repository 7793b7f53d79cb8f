// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Receiver-side NACK interval tracking.
//!
//! Keeps the set of ids known to be missing as disjoint half-open intervals,
//! merging overlapping and adjacent ranges so that one NACK packet covers
//! each contiguous run of losses.
//!
//! # Algorithm
//!
//! Intervals live in a `BTreeMap<begin, end>`:
//! 1. `nack_range(b, e)` absorbs the predecessor if it touches `b`, then every
//!    successor starting at or before `e`.
//! 2. `cancel(id)` removes `id` from its interval, splitting it in two when
//!    `id` is interior.
//! 3. `get_nacks()` walks the map in key order, so NACKs are ascending.
//!
//! # Example
//!
//! ```ignore
//! let mut tracker = NackTracker::new();
//! tracker.nack_range(5, 10);
//! tracker.cancel(7);
//! assert_eq!(tracker.intervals().collect::<Vec<_>>(), vec![5..7, 8..10]);
//! ```

use std::collections::BTreeMap;
use std::ops::Range;

use crate::packet::{Packet, PacketId};

/// Coalesced set of missing ids.
#[derive(Debug, Clone, Default)]
pub struct NackTracker {
    /// `begin -> end`, disjoint and non-adjacent.
    intervals: BTreeMap<PacketId, PacketId>,
}

impl NackTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `[begin, end)` as missing.
    ///
    /// Empty and already-covered ranges are no-ops.
    pub fn nack_range(&mut self, begin: PacketId, end: PacketId) {
        if begin >= end {
            return;
        }

        let mut new_begin = begin;
        let mut new_end = end;

        if let Some((&b, &e)) = self.intervals.range(..=begin).next_back() {
            if e >= begin {
                if e >= end {
                    return;
                }
                new_begin = b;
                self.intervals.remove(&b);
            }
        }

        while let Some((&b, &e)) = self.intervals.range(new_begin..=new_end).next() {
            self.intervals.remove(&b);
            new_end = new_end.max(e);
        }

        self.intervals.insert(new_begin, new_end);
    }

    /// Remove a single id. Returns whether it was tracked.
    pub fn cancel(&mut self, id: PacketId) -> bool {
        let Some((&b, &e)) = self.intervals.range(..=id).next_back() else {
            return false;
        };
        if id >= e {
            return false;
        }

        self.intervals.remove(&b);
        if b < id {
            self.intervals.insert(b, id);
        }
        if id + 1 < e {
            self.intervals.insert(id + 1, e);
        }
        true
    }

    /// Remove every id of `[begin, end)`. Returns how many were tracked.
    pub fn cancel_range(&mut self, begin: PacketId, end: PacketId) -> u64 {
        if begin >= end {
            return 0;
        }

        let mut touched: Vec<(PacketId, PacketId)> = Vec::new();
        if let Some((&b, &e)) = self.intervals.range(..begin).next_back() {
            if e > begin {
                touched.push((b, e));
            }
        }
        touched.extend(self.intervals.range(begin..end).map(|(&b, &e)| (b, e)));

        let mut removed = 0u64;
        for (b, e) in touched {
            self.intervals.remove(&b);
            if b < begin {
                self.intervals.insert(b, begin);
            }
            if e > end {
                self.intervals.insert(end, e);
            }
            removed += u64::from(e.min(end) - b.max(begin));
        }
        removed
    }

    /// Forget every outstanding interval.
    pub fn cancel_all(&mut self) {
        self.intervals.clear();
    }

    /// One NACK packet per interval, ascending.
    pub fn get_nacks(&self) -> Vec<Packet> {
        self.intervals
            .iter()
            .map(|(&b, &e)| Packet::nack(b, e))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn interval_count(&self) -> usize {
        self.intervals.len()
    }

    /// Total number of missing ids.
    pub fn missing_count(&self) -> u64 {
        self.intervals
            .iter()
            .map(|(&b, &e)| u64::from(e - b))
            .sum()
    }

    pub fn contains(&self, id: PacketId) -> bool {
        self.intervals
            .range(..=id)
            .next_back()
            .is_some_and(|(_, &e)| id < e)
    }

    /// Lowest missing id.
    pub fn first_missing(&self) -> Option<PacketId> {
        self.intervals.keys().next().copied()
    }

    /// Outstanding intervals, ascending.
    pub fn intervals(&self) -> impl Iterator<Item = Range<PacketId>> + '_ {
        self.intervals.iter().map(|(&b, &e)| b..e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranges(t: &NackTracker) -> Vec<Range<PacketId>> {
        t.intervals().collect()
    }

    fn assert_disjoint_ascending(t: &NackTracker) {
        let r = ranges(t);
        for w in r.windows(2) {
            assert!(w[0].end < w[1].start, "{:?} not disjoint/ascending", r);
        }
        assert!(r.iter().all(|x| x.start < x.end));
    }

    #[test]
    fn test_adjacent_ranges_merge() {
        let mut t = NackTracker::new();
        t.nack_range(5, 10);
        t.nack_range(10, 12);
        assert_eq!(ranges(&t), vec![5..12]);
    }

    #[test]
    fn test_overlapping_ranges_merge() {
        let mut t = NackTracker::new();
        t.nack_range(20, 25);
        t.nack_range(5, 10);
        t.nack_range(8, 22);
        assert_eq!(ranges(&t), vec![5..25]);
    }

    #[test]
    fn test_disjoint_ranges_stay_apart() {
        let mut t = NackTracker::new();
        t.nack_range(10, 12);
        t.nack_range(1, 3);
        t.nack_range(14, 15);
        assert_eq!(ranges(&t), vec![1..3, 10..12, 14..15]);
        assert_eq!(t.missing_count(), 5);
    }

    #[test]
    fn test_covered_range_is_noop() {
        let mut t = NackTracker::new();
        t.nack_range(5, 10);
        t.nack_range(6, 8);
        t.nack_range(5, 10);
        assert_eq!(ranges(&t), vec![5..10]);
    }

    #[test]
    fn test_empty_range_is_noop() {
        let mut t = NackTracker::new();
        t.nack_range(5, 5);
        t.nack_range(9, 3);
        assert!(t.is_empty());
    }

    #[test]
    fn test_cancel_splits_interval() {
        let mut t = NackTracker::new();
        t.nack_range(5, 10);
        assert!(t.cancel(7));
        assert_eq!(ranges(&t), vec![5..7, 8..10]);
    }

    #[test]
    fn test_cancel_edges() {
        let mut t = NackTracker::new();
        t.nack_range(5, 10);
        assert!(t.cancel(5));
        assert!(t.cancel(9));
        assert_eq!(ranges(&t), vec![6..9]);
        assert!(!t.cancel(9));
        assert!(!t.cancel(100));
        assert!(!t.cancel(0));
    }

    #[test]
    fn test_cancel_every_id_empties_tracker() {
        let mut t = NackTracker::new();
        t.nack_range(5, 10);
        for id in 5..10 {
            assert!(t.cancel(id));
        }
        assert!(t.is_empty());
        assert!(t.get_nacks().is_empty());
    }

    #[test]
    fn test_cancel_then_renack() {
        let mut t = NackTracker::new();
        t.nack_range(5, 10);
        t.cancel(7);
        t.nack_range(6, 9);
        assert_eq!(ranges(&t), vec![5..10]);
    }

    #[test]
    fn test_cancel_range() {
        let mut t = NackTracker::new();
        t.nack_range(0, 4);
        t.nack_range(6, 10);
        t.nack_range(12, 20);
        assert_eq!(t.cancel_range(2, 14), 2 + 4 + 2);
        assert_eq!(ranges(&t), vec![0..2, 14..20]);
        assert_eq!(t.cancel_range(30, 40), 0);
        assert_eq!(t.cancel_range(15, 16), 1);
        assert_eq!(ranges(&t), vec![0..2, 14..15, 16..20]);
    }

    #[test]
    fn test_cancel_all() {
        let mut t = NackTracker::new();
        t.nack_range(1, 2);
        t.nack_range(4, 9);
        t.cancel_all();
        assert!(t.is_empty());
        assert_eq!(t.missing_count(), 0);
    }

    #[test]
    fn test_get_nacks_ascending() {
        let mut t = NackTracker::new();
        t.nack_range(30, 31);
        t.nack_range(3, 5);
        t.nack_range(10, 20);
        let nacks = t.get_nacks();
        assert_eq!(nacks, vec![Packet::nack(3, 5), Packet::nack(10, 20), Packet::nack(30, 31)]);
        assert!(nacks.iter().all(|p| Some(p.id) == p.nack_range().map(|r| r.start)));
    }

    #[test]
    fn test_contains_and_first_missing() {
        let mut t = NackTracker::new();
        assert_eq!(t.first_missing(), None);
        t.nack_range(4, 6);
        assert!(t.contains(4));
        assert!(t.contains(5));
        assert!(!t.contains(6));
        assert!(!t.contains(3));
        assert_eq!(t.first_missing(), Some(4));
    }

    #[test]
    fn test_mixed_operations_keep_invariants() {
        let mut t = NackTracker::new();
        let mut seed = 0x2545_f491_u32;
        for _ in 0..2000 {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            let a = seed % 200;
            let b = a + (seed >> 8) % 12;
            match seed % 3 {
                0 => t.nack_range(a, b),
                1 => {
                    t.cancel(a);
                }
                _ => {
                    t.cancel_range(a, b);
                }
            }
            assert_disjoint_ascending(&t);
        }
    }
}
