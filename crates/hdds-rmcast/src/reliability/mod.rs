// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reliability building blocks.
//!
//! - [`SenderHistory`]: bounded retransmission buffer and heartbeat source
//! - [`NackTracker`]: coalesced missing-id intervals
//! - [`ReceiverLogic`]: in-order delivery with bounded hold-back
//! - [`SessionMetrics`]: lock-free per-session counters
//!
//! None of these perform I/O; the session drives them.

pub mod history;
pub mod metrics;
pub mod nack;
pub mod receiver;

pub use history::SenderHistory;
pub use metrics::{SessionMetrics, SessionMetricsSnapshot};
pub use nack::NackTracker;
pub use receiver::{ReceiveOutcome, ReceiverLogic};
