// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Boundary between a session and whatever drives it.

use std::time::Duration;

use crate::error::UnrecoverableGap;

/// Timers a session may arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TimerId {
    /// Sender heartbeat period.
    Heartbeat,
    /// Receiver NACK retry.
    NackRetry,
}

/// Effects a session asks its driver to carry out.
///
/// The driver owns the socket and the clock; the session only decides what
/// should happen. Scheduling a timer that is already armed replaces its
/// deadline.
pub trait SessionContext {
    /// Send one encoded datagram to the multicast group.
    fn transmit(&mut self, datagram: Vec<u8>);

    /// Fire `timer` after `after`, replacing any pending deadline.
    fn schedule(&mut self, timer: TimerId, after: Duration);

    /// Disarm `timer` if pending.
    fn cancel(&mut self, timer: TimerId);

    /// Hand a complete message to the application.
    fn deliver(&mut self, message: Vec<u8>);

    /// Report ids that will never be delivered.
    fn data_lost(&mut self, _gap: UnrecoverableGap) {}
}
