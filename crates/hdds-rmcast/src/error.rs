// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::config::ConfigError;
use crate::packet::PacketId;

/// Ids `[begin, end)` that will never be delivered.
///
/// Reported to the application as a value; it only becomes fatal through
/// `max_lost_packets`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct UnrecoverableGap {
    pub begin: PacketId,
    pub end: PacketId,
}

impl UnrecoverableGap {
    pub fn new(begin: PacketId, end: PacketId) -> Self {
        Self { begin, end }
    }

    /// Number of ids in the gap.
    pub fn len(&self) -> u64 {
        u64::from(self.end.saturating_sub(self.begin))
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.begin
    }
}

impl fmt::Display for UnrecoverableGap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.begin, self.end)
    }
}

/// Why a session entered `DEFUNCT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DefunctReason {
    /// NACKs went unanswered for too many consecutive retries.
    NackRetriesExhausted { retries: u32 },
    /// Out-of-order packets exceeded the receive buffer (hard reliability).
    ReceiveBufferOverflow { held: usize, capacity: usize },
    /// More ids were lost than `max_lost_packets` allows.
    LossThresholdExceeded { lost: u64, limit: u64 },
    /// The session was stopped locally.
    Stopped,
}

impl fmt::Display for DefunctReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NackRetriesExhausted { retries } => {
                write!(f, "no repair progress after {} NACK retries", retries)
            }
            Self::ReceiveBufferOverflow { held, capacity } => write!(
                f,
                "receive buffer overflow ({} held, capacity {})",
                held, capacity
            ),
            Self::LossThresholdExceeded { lost, limit } => {
                write!(f, "{} packets lost (limit {})", lost, limit)
            }
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Reliable multicast errors.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Session defunct: {0}")]
    SessionDefunct(DefunctReason),

    #[error("Session not started")]
    NotActive,

    #[error("Session is not a sender")]
    NotSender,

    #[error("Sender id space exhausted")]
    SequenceExhausted,

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Endpoint channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, Error>;
