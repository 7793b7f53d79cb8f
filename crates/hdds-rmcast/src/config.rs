// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reliable multicast configuration.
//!
//! Supports both programmatic and file-based configuration. Every field has
//! a default, so an empty TOML file is a valid configuration.
//!
//! ```toml
//! local_address = "0.0.0.0:49152"
//! multicast_group_address = "239.255.0.2:49152"
//! sender_history_size = 1024
//! reliability = "soft"
//! join = "from-start"
//! ```

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::packet::HEADER_LEN;

/// Largest UDP payload over IPv4.
pub const MAX_UDP_PAYLOAD: usize = 65_507;

/// Largest data chunk that still fits one datagram (header + length field).
pub const MAX_PAYLOAD_SIZE: usize = MAX_UDP_PAYLOAD - HEADER_LEN - 4;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// What a receiver does when its hold-back buffer overflows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReliabilityMode {
    /// The session fails.
    #[default]
    Hard,
    /// The oldest gaps are given up and delivery resumes.
    Soft,
}

/// Where a receiver starts expecting data from a newly seen sender.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JoinMode {
    /// Synchronise on the first packet observed.
    #[default]
    FromFirstReceived,
    /// Expect every id from 0.
    FromStart,
}

/// Reliable multicast configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RmcastConfig {
    /// Local bind address.
    #[serde(default = "default_local_address")]
    pub local_address: SocketAddr,

    /// Multicast group and port sessions talk on.
    #[serde(default = "default_group_address")]
    pub multicast_group_address: SocketAddr,

    /// Multicast TTL (hops).
    #[serde(default = "default_ttl")]
    pub multicast_ttl: u32,

    /// Receive our own multicast traffic.
    #[serde(default = "default_true")]
    pub multicast_loop: bool,

    /// Packets retained for retransmission per sender.
    #[serde(default = "default_sender_history_size")]
    pub sender_history_size: usize,

    /// Out-of-order packets a receiver holds back per remote sender.
    #[serde(default = "default_receiver_buffer_size")]
    pub receiver_buffer_size: usize,

    /// Largest payload chunk per data packet (bytes).
    #[serde(default = "default_max_payload_size")]
    pub max_payload_size: usize,

    /// Heartbeat period (milliseconds).
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,

    /// Base NACK retry interval (milliseconds).
    #[serde(default = "default_nak_interval")]
    pub nak_interval_ms: u64,

    /// Multiplier applied per unanswered NACK retry.
    #[serde(default = "default_nak_backoff")]
    pub nak_backoff: f64,

    /// Upper bound of the NACK retry interval (milliseconds).
    #[serde(default = "default_nak_max_interval")]
    pub nak_max_interval_ms: u64,

    /// Randomise NACK intervals by a factor in `[1, 2)`.
    #[serde(default = "default_true")]
    pub nak_jitter: bool,

    /// Consecutive NACK retries without progress before the session fails.
    #[serde(default = "default_nak_max_retries")]
    pub nak_max_retries: u32,

    /// Receive buffer overflow policy.
    #[serde(default)]
    pub reliability: ReliabilityMode,

    /// Receiver join policy.
    #[serde(default)]
    pub join: JoinMode,

    /// Fail a receive session once more ids than this are lost.
    #[serde(default)]
    pub max_lost_packets: Option<u64>,

    /// Depth of the application command and event queues.
    #[serde(default = "default_command_queue_depth")]
    pub command_queue_depth: usize,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_local_address() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 49152))
}

fn default_group_address() -> SocketAddr {
    SocketAddr::from(([239, 255, 0, 2], 49152))
}

fn default_ttl() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

fn default_sender_history_size() -> usize {
    1024
}

fn default_receiver_buffer_size() -> usize {
    256
}

fn default_max_payload_size() -> usize {
    1024
}

fn default_heartbeat_interval() -> u64 {
    500
}

fn default_nak_interval() -> u64 {
    500
}

fn default_nak_backoff() -> f64 {
    2.0
}

fn default_nak_max_interval() -> u64 {
    8_000
}

fn default_nak_max_retries() -> u32 {
    5
}

fn default_command_queue_depth() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RmcastConfig {
    fn default() -> Self {
        Self {
            local_address: default_local_address(),
            multicast_group_address: default_group_address(),
            multicast_ttl: default_ttl(),
            multicast_loop: true,
            sender_history_size: default_sender_history_size(),
            receiver_buffer_size: default_receiver_buffer_size(),
            max_payload_size: default_max_payload_size(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            nak_interval_ms: default_nak_interval(),
            nak_backoff: default_nak_backoff(),
            nak_max_interval_ms: default_nak_max_interval(),
            nak_jitter: true,
            nak_max_retries: default_nak_max_retries(),
            reliability: ReliabilityMode::Hard,
            join: JoinMode::FromFirstReceived,
            max_lost_packets: None,
            command_queue_depth: default_command_queue_depth(),
            log_level: default_log_level(),
        }
    }
}

impl RmcastConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.multicast_group_address.ip().is_multicast() {
            return Err(ConfigError::Invalid(format!(
                "multicast_group_address {} is not a multicast address",
                self.multicast_group_address
            )));
        }
        if self.sender_history_size == 0 {
            return Err(ConfigError::Invalid(
                "sender_history_size must be at least 1".into(),
            ));
        }
        if self.receiver_buffer_size == 0 {
            return Err(ConfigError::Invalid(
                "receiver_buffer_size must be at least 1".into(),
            ));
        }
        if self.max_payload_size == 0 || self.max_payload_size > MAX_PAYLOAD_SIZE {
            return Err(ConfigError::Invalid(format!(
                "max_payload_size must be in 1..={}",
                MAX_PAYLOAD_SIZE
            )));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "heartbeat_interval_ms must be positive".into(),
            ));
        }
        if self.nak_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "nak_interval_ms must be positive".into(),
            ));
        }
        if !self.nak_backoff.is_finite() || self.nak_backoff < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "nak_backoff must be a finite value >= 1.0 (got {})",
                self.nak_backoff
            )));
        }
        if self.nak_max_interval_ms < self.nak_interval_ms {
            return Err(ConfigError::Invalid(format!(
                "nak_max_interval_ms ({}) is below nak_interval_ms ({})",
                self.nak_max_interval_ms, self.nak_interval_ms
            )));
        }
        if self.nak_max_retries == 0 {
            return Err(ConfigError::Invalid(
                "nak_max_retries must be at least 1".into(),
            ));
        }
        if self.command_queue_depth == 0 {
            return Err(ConfigError::Invalid(
                "command_queue_depth must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn nak_interval(&self) -> Duration {
        Duration::from_millis(self.nak_interval_ms)
    }

    pub fn nak_max_interval(&self) -> Duration {
        Duration::from_millis(self.nak_max_interval_ms)
    }
}
