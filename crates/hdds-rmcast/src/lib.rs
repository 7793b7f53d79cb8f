// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HDDS Reliable Multicast
//!
//! NACK-based reliable delivery of byte messages over UDP multicast.
//!
//! # Features
//!
//! - **Sequenced Packets**: Every data chunk carries a 32-bit id assigned by
//!   the sender
//! - **Bounded History**: The sender keeps the most recent packets for
//!   retransmission and answers evicted ids with `DATA_NOT_AVAILABLE`
//! - **Gap Repair**: Receivers NACK missing ranges immediately, then retry
//!   with backoff, jitter and peer suppression
//! - **Ordered Delivery**: Messages are reassembled and delivered in send
//!   order; unrecoverable gaps are reported, never papered over
//! - **Sans-IO Core**: [`Session`] is a pure state machine; [`Endpoint`]
//!   drives it on a tokio UDP socket
//!
//! # Quick Start
//!
//! ```bash
//! # Receive on the default group
//! hdds-rmcast-probe recv
//!
//! # Send ten messages
//! hdds-rmcast-probe send --count 10 "hello"
//! ```
//!
//! # Configuration File
//!
//! ```toml
//! multicast_group_address = "239.255.0.2:49152"
//! sender_history_size = 1024
//! nak_interval_ms = 500
//! reliability = "hard"
//! join = "from-first-received"
//! ```

pub mod config;
pub mod endpoint;
pub mod error;
pub mod packet;
pub mod reliability;
pub mod session;
pub mod transport;

pub use config::{ConfigError, JoinMode, ReliabilityMode, RmcastConfig};
pub use endpoint::{Endpoint, EndpointEvent, EndpointHandle, EndpointRole, EndpointStats, PeerStats};
pub use error::{DefunctReason, Error, Result, UnrecoverableGap};
pub use packet::{Packet, PacketId, PacketKind, PacketType};
pub use reliability::{NackTracker, SenderHistory, SessionMetrics, SessionMetricsSnapshot};
pub use session::{Role, Session, SessionConfig, SessionContext, SessionState, TimerId};
