// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Metrics for reliable multicast sessions
//!
//! Tracks traffic, gap detection, NACK/heartbeat exchange and loss.
//!
//! # Thread Safety
//!
//! All methods use atomic operations (Relaxed ordering). A session updates
//! its counters from the endpoint task while other threads hold an
//! `Arc<SessionMetrics>` and take snapshots.
//!
//! # Example
//!
//! ```ignore
//! let metrics = SessionMetrics::new();
//! metrics.record_gap(3);
//! let snap = metrics.snapshot();
//! assert_eq!(snap.gaps_detected, 1);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Per-session counters.
#[derive(Debug, Default)]
pub struct SessionMetrics {
    packets_sent: AtomicU64,
    packets_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    messages_sent: AtomicU64,
    messages_delivered: AtomicU64,
    messages_discarded: AtomicU64,

    /// Retransmitted data packets (sender-side)
    retransmit_sent: AtomicU64,
    /// `DATA_NOT_AVAILABLE` markers sent (sender-side)
    not_available_sent: AtomicU64,
    /// Data packets that filled a gap (receiver-side)
    retransmit_received: AtomicU64,

    nacks_sent: AtomicU64,
    nacks_received: AtomicU64,
    nacks_suppressed: AtomicU64,
    heartbeats_sent: AtomicU64,
    heartbeats_received: AtomicU64,

    /// Gap detections (cumulative)
    gaps_detected: AtomicU64,
    /// Largest single gap observed (high-water mark)
    max_gap_size: AtomicU64,
    duplicates: AtomicU64,
    /// Ids accepted as permanently lost
    packets_lost: AtomicU64,
    decode_errors: AtomicU64,
}

/// Point-in-time copy of [`SessionMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionMetricsSnapshot {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub messages_sent: u64,
    pub messages_delivered: u64,
    pub messages_discarded: u64,
    pub retransmit_sent: u64,
    pub not_available_sent: u64,
    pub retransmit_received: u64,
    pub nacks_sent: u64,
    pub nacks_received: u64,
    pub nacks_suppressed: u64,
    pub heartbeats_sent: u64,
    pub heartbeats_received: u64,
    pub gaps_detected: u64,
    pub max_gap_size: u64,
    pub duplicates: u64,
    pub packets_lost: u64,
    pub decode_errors: u64,
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one outgoing datagram of `bytes` length.
    pub fn record_sent(&self, bytes: usize) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Count one incoming datagram of `bytes` length.
    pub fn record_received(&self, bytes: usize) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record gap detection (increment gaps_detected, update max_gap_size)
    pub fn record_gap(&self, gap_size: u64) {
        self.gaps_detected.fetch_add(1, Ordering::Relaxed);
        self.max_gap_size.fetch_max(gap_size, Ordering::Relaxed);
    }

    pub fn increment_messages_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_messages_delivered(&self) {
        self.messages_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_messages_discarded(&self, count: u64) {
        self.messages_discarded.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_retransmit_sent(&self, count: u64) {
        self.retransmit_sent.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_not_available_sent(&self, count: u64) {
        self.not_available_sent.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_retransmit_received(&self) {
        self.retransmit_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_nacks_sent(&self, count: u64) {
        self.nacks_sent.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_nacks_received(&self) {
        self.nacks_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_nacks_suppressed(&self, count: u64) {
        self.nacks_suppressed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_heartbeats_sent(&self) {
        self.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_heartbeats_received(&self) {
        self.heartbeats_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_duplicates(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_packets_lost(&self, count: u64) {
        self.packets_lost.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_decode_errors(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Ids accepted as permanently lost so far.
    pub fn packets_lost(&self) -> u64 {
        self.packets_lost.load(Ordering::Relaxed)
    }

    pub fn gaps_detected(&self) -> u64 {
        self.gaps_detected.load(Ordering::Relaxed)
    }

    pub fn decode_errors(&self) -> u64 {
        self.decode_errors.load(Ordering::Relaxed)
    }

    /// Load every counter.
    pub fn snapshot(&self) -> SessionMetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        SessionMetricsSnapshot {
            packets_sent: load(&self.packets_sent),
            packets_received: load(&self.packets_received),
            bytes_sent: load(&self.bytes_sent),
            bytes_received: load(&self.bytes_received),
            messages_sent: load(&self.messages_sent),
            messages_delivered: load(&self.messages_delivered),
            messages_discarded: load(&self.messages_discarded),
            retransmit_sent: load(&self.retransmit_sent),
            not_available_sent: load(&self.not_available_sent),
            retransmit_received: load(&self.retransmit_received),
            nacks_sent: load(&self.nacks_sent),
            nacks_received: load(&self.nacks_received),
            nacks_suppressed: load(&self.nacks_suppressed),
            heartbeats_sent: load(&self.heartbeats_sent),
            heartbeats_received: load(&self.heartbeats_received),
            gaps_detected: load(&self.gaps_detected),
            max_gap_size: load(&self.max_gap_size),
            duplicates: load(&self.duplicates),
            packets_lost: load(&self.packets_lost),
            decode_errors: load(&self.decode_errors),
        }
    }
}
