// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reliable multicast session.
//!
//! A session is one reliability relationship: either the local sender, or
//! one remote sender as seen by the local receiver. It is sans-IO: inbound
//! datagrams, timer expiries and application sends are fed in as events and
//! every effect goes out through a [`SessionContext`].
//!
//! # State Machine
//!
//! ```text
//!   +---------+   start()   +---------+  retries exhausted /  +---------+
//!   | Initial |------------>| Active  |--buffer overflow /--->| Defunct |
//!   +---------+             +---------+  loss limit / stop()  +---------+
//! ```
//!
//! Events before `start()` are ignored. `Defunct` is terminal: every call
//! returns [`Error::SessionDefunct`].
//!
//! # Sender
//!
//! - `send()`: packetize, stamp through [`SenderHistory`], transmit, re-arm
//!   the heartbeat timer
//! - heartbeat timer: transmit `HEARTBEAT(highest id)` once anything was sent
//! - NACK: answer from the history (`DATA_NOT_AVAILABLE` for evicted ids)
//!
//! # Receiver
//!
//! - DATA / `DATA_NOT_AVAILABLE` / HEARTBEAT feed [`ReceiverLogic`]
//! - a newly detected gap triggers an immediate NACK and arms the retry timer
//! - retry timer: resend outstanding NACKs minus ranges a peer receiver
//!   already requested, backing off; too many retries without progress make
//!   the session defunct
//!
//! # Example
//!
//! ```ignore
//! let mut session = Session::sender(SessionConfig::default());
//! session.start(&mut ctx)?;
//! session.send(b"hello", &mut ctx)?;
//!
//! // In event loop:
//! session.on_datagram(&bytes, &mut ctx)?;
//! session.on_timer(TimerId::Heartbeat, &mut ctx)?;
//! ```

mod context;

pub use context::{SessionContext, TimerId};

use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, trace, warn};

use crate::config::{JoinMode, ReliabilityMode, RmcastConfig};
use crate::error::{DefunctReason, Error, Result};
use crate::packet::{self, packetize, Packet, PacketId, PacketType};
use crate::reliability::{
    NackTracker, ReceiveOutcome, ReceiverLogic, SenderHistory, SessionMetrics,
};

/// Session configuration.
///
/// # Timeout Parameters
///
/// - `heartbeat_interval`: period of sender heartbeats
/// - `nak_interval`: first NACK retry delay
/// - `nak_backoff`: multiplier per retry without progress, capped at
///   `nak_max_interval`
/// - `nak_jitter`: scale each delay by a random factor in `[1, 2)`
///
/// Default worst-case repair timeout (no jitter):
/// 500 + 1000 + 2000 + 4000 + 8000 + 8000 ms.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub sender_history_size: usize,
    pub receiver_buffer_size: usize,
    pub max_payload_size: usize,
    pub heartbeat_interval: Duration,
    pub nak_interval: Duration,
    pub nak_backoff: f64,
    pub nak_max_interval: Duration,
    pub nak_jitter: bool,
    pub nak_max_retries: u32,
    pub reliability: ReliabilityMode,
    pub join: JoinMode,
    pub max_lost_packets: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&RmcastConfig::default())
    }
}

impl From<&RmcastConfig> for SessionConfig {
    fn from(config: &RmcastConfig) -> Self {
        Self {
            sender_history_size: config.sender_history_size,
            receiver_buffer_size: config.receiver_buffer_size,
            max_payload_size: config.max_payload_size,
            heartbeat_interval: config.heartbeat_interval(),
            nak_interval: config.nak_interval(),
            nak_backoff: config.nak_backoff,
            nak_max_interval: config.nak_max_interval(),
            nak_jitter: config.nak_jitter,
            nak_max_retries: config.nak_max_retries,
            reliability: config.reliability,
            join: config.join,
            max_lost_packets: config.max_lost_packets,
        }
    }
}

impl SessionConfig {
    /// Delay before the NACK retry following `retries` unanswered ones.
    pub fn nack_delay(&self, retries: u32) -> Duration {
        let exp = i32::try_from(retries).unwrap_or(i32::MAX);
        let base = self.nak_interval.as_secs_f64() * self.nak_backoff.powi(exp);
        let capped = base.min(self.nak_max_interval.as_secs_f64());
        let factor = if self.nak_jitter {
            1.0 + fastrand::f64()
        } else {
            1.0
        };
        Duration::from_secs_f64(capped * factor)
    }
}

/// Role of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Sender,
    Receiver,
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    /// Created, not started. Events are ignored.
    Initial,
    /// Exchanging packets.
    Active,
    /// Failed or stopped. Terminal.
    Defunct,
}

#[derive(Debug)]
struct ReceiverState {
    logic: ReceiverLogic,
    /// Consecutive retry expiries without progress.
    retries: u32,
    /// Some missing id was resolved since the last retry.
    progress: bool,
    retry_armed: bool,
    /// Ranges other receivers requested since our last retry.
    peer_nacks: NackTracker,
    /// Our own last NACKs, expected back through multicast loopback.
    echoes: Vec<Range<PacketId>>,
}

impl ReceiverState {
    fn note_peer_nack(&mut self, range: Range<PacketId>) {
        if let Some(pos) = self.echoes.iter().position(|r| *r == range) {
            self.echoes.swap_remove(pos);
            return;
        }
        self.peer_nacks.nack_range(range.start, range.end);
    }
}

#[derive(Debug)]
enum RoleState {
    Sender(SenderHistory),
    Receiver(Box<ReceiverState>),
}

/// Reliable multicast session state machine.
#[derive(Debug)]
pub struct Session {
    config: SessionConfig,
    state: SessionState,
    defunct_reason: Option<DefunctReason>,
    role: RoleState,
    metrics: Arc<SessionMetrics>,
}

fn emit<C: SessionContext + ?Sized>(ctx: &mut C, metrics: &SessionMetrics, packet: &Packet) {
    let datagram = packet::encode(packet);
    metrics.record_sent(datagram.len());
    ctx.transmit(datagram);
}

impl Session {
    pub fn new(role: Role, config: SessionConfig) -> Self {
        let role = match role {
            Role::Sender => RoleState::Sender(SenderHistory::new(config.sender_history_size)),
            Role::Receiver => RoleState::Receiver(Box::new(ReceiverState {
                logic: ReceiverLogic::new(
                    config.receiver_buffer_size,
                    config.reliability,
                    config.join,
                ),
                retries: 0,
                progress: false,
                retry_armed: false,
                peer_nacks: NackTracker::new(),
                echoes: Vec::new(),
            })),
        };
        Self {
            config,
            state: SessionState::Initial,
            defunct_reason: None,
            role,
            metrics: Arc::new(SessionMetrics::new()),
        }
    }

    pub fn sender(config: SessionConfig) -> Self {
        Self::new(Role::Sender, config)
    }

    pub fn receiver(config: SessionConfig) -> Self {
        Self::new(Role::Receiver, config)
    }

    pub fn role(&self) -> Role {
        match self.role {
            RoleState::Sender(_) => Role::Sender,
            RoleState::Receiver(_) => Role::Receiver,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Why the session became defunct, if it did.
    pub fn defunct_reason(&self) -> Option<DefunctReason> {
        self.defunct_reason
    }

    /// Shared handle to this session's counters.
    pub fn metrics(&self) -> Arc<SessionMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Sender history (sender role only).
    pub fn history(&self) -> Option<&SenderHistory> {
        match &self.role {
            RoleState::Sender(history) => Some(history),
            RoleState::Receiver(_) => None,
        }
    }

    /// Receive-side ordering state (receiver role only).
    pub fn receiver_logic(&self) -> Option<&ReceiverLogic> {
        match &self.role {
            RoleState::Receiver(rx) => Some(&rx.logic),
            RoleState::Sender(_) => None,
        }
    }

    /// `Initial -> Active`. Senders arm their heartbeat timer.
    pub fn start<C: SessionContext + ?Sized>(&mut self, ctx: &mut C) -> Result<()> {
        match self.state {
            SessionState::Active => Ok(()),
            SessionState::Defunct => Err(self.defunct_error()),
            SessionState::Initial => {
                self.state = SessionState::Active;
                if self.role() == Role::Sender {
                    ctx.schedule(TimerId::Heartbeat, self.config.heartbeat_interval);
                }
                debug!(role = ?self.role(), "session active");
                Ok(())
            }
        }
    }

    /// Tear the session down. Idempotent.
    pub fn stop<C: SessionContext + ?Sized>(&mut self, ctx: &mut C) {
        if self.state == SessionState::Defunct {
            return;
        }
        ctx.cancel(TimerId::Heartbeat);
        ctx.cancel(TimerId::NackRetry);
        self.state = SessionState::Defunct;
        self.defunct_reason = Some(DefunctReason::Stopped);
        info!(role = ?self.role(), "session stopped");
    }

    /// Send one application message (sender role).
    pub fn send<C: SessionContext + ?Sized>(&mut self, message: &[u8], ctx: &mut C) -> Result<()> {
        self.ensure_active()?;
        let RoleState::Sender(history) = &mut self.role else {
            return Err(Error::NotSender);
        };

        let packets = packetize(message, self.config.max_payload_size);
        let available = u64::from(PacketId::MAX - history.next_id());
        if packets.len() as u64 > available {
            warn!(next_id = history.next_id(), "sender id space exhausted");
            return Err(Error::SequenceExhausted);
        }

        for chunk in packets {
            for stamped in history.send(chunk) {
                trace!(id = stamped.id, "data out");
                emit(ctx, &self.metrics, &stamped);
            }
        }
        self.metrics.increment_messages_sent();
        ctx.schedule(TimerId::Heartbeat, self.config.heartbeat_interval);
        Ok(())
    }

    /// Feed one inbound datagram. Malformed datagrams are counted and dropped.
    pub fn on_datagram<C: SessionContext + ?Sized>(&mut self, datagram: &[u8], ctx: &mut C) -> Result<()> {
        match self.state {
            SessionState::Initial => return Ok(()),
            SessionState::Defunct => return Err(self.defunct_error()),
            SessionState::Active => {}
        }
        self.metrics.record_received(datagram.len());

        match packet::decode(datagram) {
            Ok(packet) => self.on_packet(packet, ctx),
            Err(e) => {
                self.metrics.increment_decode_errors();
                debug!(error = %e, len = datagram.len(), "dropping malformed datagram");
                Ok(())
            }
        }
    }

    /// Feed one decoded packet.
    pub fn on_packet<C: SessionContext + ?Sized>(&mut self, packet: Packet, ctx: &mut C) -> Result<()> {
        match self.state {
            SessionState::Initial => return Ok(()),
            SessionState::Defunct => return Err(self.defunct_error()),
            SessionState::Active => {}
        }

        match self.role() {
            Role::Sender => self.sender_packet(packet, ctx),
            Role::Receiver => self.receiver_packet(packet, ctx),
        }
    }

    /// Handle expiry of a timer previously scheduled through the context.
    pub fn on_timer<C: SessionContext + ?Sized>(&mut self, timer: TimerId, ctx: &mut C) -> Result<()> {
        match self.state {
            SessionState::Initial => return Ok(()),
            SessionState::Defunct => return Err(self.defunct_error()),
            SessionState::Active => {}
        }

        match timer {
            TimerId::Heartbeat => {
                self.heartbeat(ctx);
                Ok(())
            }
            TimerId::NackRetry => self.nack_retry(ctx),
        }
    }

    // ========================================================================
    // SENDER
    // ========================================================================

    fn sender_packet<C: SessionContext + ?Sized>(&mut self, packet: Packet, ctx: &mut C) -> Result<()> {
        let RoleState::Sender(history) = &self.role else {
            return Ok(());
        };
        let Some(range) = packet.nack_range() else {
            trace!(id = packet.id, kind = ?packet.packet_type(), "sender ignoring packet");
            return Ok(());
        };
        self.metrics.increment_nacks_received();

        // Ids never assigned cannot be answered.
        let end = range.end.min(history.next_id());
        if range.start >= end {
            debug!(begin = range.start, end = range.end, "NACK beyond sent range ignored");
            return Ok(());
        }

        // Evicted ids are answered a window at a time; the receiver's next
        // NACK picks up where this one stopped.
        let begin = range.start;
        let replies = match history.oldest_id() {
            Some(oldest) if begin < oldest => {
                let window = PacketId::try_from(history.capacity()).unwrap_or(PacketId::MAX);
                let unavailable_end = oldest.min(end).min(begin.saturating_add(window));
                let mut replies = history.receive(&Packet::nack(begin, unavailable_end));
                if oldest < end {
                    replies.extend(history.receive(&Packet::nack(oldest, end)));
                }
                if unavailable_end < oldest.min(end) {
                    debug!(
                        begin,
                        answered = unavailable_end,
                        oldest,
                        "NACK below history truncated"
                    );
                }
                replies
            }
            _ => history.receive(&Packet::nack(begin, end)),
        };
        let mut retransmitted = 0u64;
        let mut unavailable = 0u64;
        for reply in &replies {
            if reply.is_data() {
                retransmitted += 1;
            } else {
                unavailable += 1;
            }
            emit(ctx, &self.metrics, reply);
        }
        self.metrics.increment_retransmit_sent(retransmitted);
        self.metrics.increment_not_available_sent(unavailable);
        debug!(
            begin = range.start,
            end,
            retransmitted,
            unavailable,
            "answered NACK"
        );
        Ok(())
    }

    fn heartbeat<C: SessionContext + ?Sized>(&mut self, ctx: &mut C) {
        let RoleState::Sender(history) = &self.role else {
            return;
        };
        if let Some(heartbeat) = history.make_heartbeat() {
            trace!(id = heartbeat.id, "heartbeat out");
            emit(ctx, &self.metrics, &heartbeat);
            self.metrics.increment_heartbeats_sent();
        }
        ctx.schedule(TimerId::Heartbeat, self.config.heartbeat_interval);
    }

    // ========================================================================
    // RECEIVER
    // ========================================================================

    fn receiver_packet<C: SessionContext + ?Sized>(&mut self, packet: Packet, ctx: &mut C) -> Result<()> {
        let RoleState::Receiver(rx) = &mut self.role else {
            return Ok(());
        };

        let result = match packet.packet_type() {
            PacketType::DataIntermediate | PacketType::DataEndOfMessage => {
                let result = rx.logic.on_data(packet);
                if matches!(&result, Ok(outcome) if outcome.repaired) {
                    self.metrics.increment_retransmit_received();
                }
                result
            }
            PacketType::DataNotAvailable => rx.logic.on_not_available(packet.id),
            PacketType::Heartbeat => {
                self.metrics.increment_heartbeats_received();
                Ok(rx.logic.on_heartbeat(packet.id))
            }
            PacketType::Nack => {
                if let Some(range) = packet.nack_range() {
                    rx.note_peer_nack(range);
                }
                return Ok(());
            }
        };

        match result {
            Ok(outcome) => self.apply_outcome(outcome, ctx),
            Err(reason) => Err(self.fail(reason, ctx)),
        }
    }

    fn apply_outcome<C: SessionContext + ?Sized>(
        &mut self,
        outcome: ReceiveOutcome,
        ctx: &mut C,
    ) -> Result<()> {
        if outcome.duplicate {
            self.metrics.increment_duplicates();
        }
        if let Some(size) = outcome.new_gap {
            self.metrics.record_gap(size);
        }
        self.metrics.add_messages_discarded(outcome.discarded_messages);

        for message in outcome.delivered {
            self.metrics.increment_messages_delivered();
            ctx.deliver(message);
        }
        for gap in outcome.lost {
            self.metrics.add_packets_lost(gap.len());
            warn!(%gap, "unrecoverable gap");
            ctx.data_lost(gap);
        }

        if let Some(limit) = self.config.max_lost_packets {
            let lost = self.metrics.packets_lost();
            if lost > limit {
                return Err(self.fail(DefunctReason::LossThresholdExceeded { lost, limit }, ctx));
            }
        }

        let RoleState::Receiver(rx) = &mut self.role else {
            return Ok(());
        };
        if outcome.repaired {
            rx.progress = true;
        }

        if outcome.new_gap.is_some() {
            let nacks = rx.logic.nacks();
            rx.echoes = nacks.iter().filter_map(Packet::nack_range).collect();
            for nack in &nacks {
                emit(ctx, &self.metrics, nack);
            }
            self.metrics.increment_nacks_sent(nacks.len() as u64);
        }

        if !rx.logic.has_missing() {
            if rx.retry_armed {
                ctx.cancel(TimerId::NackRetry);
                rx.retry_armed = false;
            }
            rx.retries = 0;
            rx.progress = false;
            rx.peer_nacks.cancel_all();
        } else if !rx.retry_armed {
            ctx.schedule(TimerId::NackRetry, self.config.nack_delay(0));
            rx.retry_armed = true;
        }
        Ok(())
    }

    fn nack_retry<C: SessionContext + ?Sized>(&mut self, ctx: &mut C) -> Result<()> {
        let RoleState::Receiver(rx) = &mut self.role else {
            return Ok(());
        };
        rx.retry_armed = false;

        if !rx.logic.has_missing() {
            rx.retries = 0;
            return Ok(());
        }

        if rx.progress {
            rx.retries = 0;
            rx.progress = false;
        } else {
            rx.retries += 1;
        }

        if rx.retries > self.config.nak_max_retries {
            let retries = rx.retries;
            return Err(self.fail(DefunctReason::NackRetriesExhausted { retries }, ctx));
        }

        let mut outgoing = rx.logic.tracker().clone();
        let mut suppressed = 0u64;
        for range in rx.peer_nacks.intervals() {
            suppressed += outgoing.cancel_range(range.start, range.end);
        }
        rx.peer_nacks.cancel_all();

        let nacks = outgoing.get_nacks();
        rx.echoes = nacks.iter().filter_map(Packet::nack_range).collect();
        for nack in &nacks {
            emit(ctx, &self.metrics, nack);
        }
        self.metrics.increment_nacks_sent(nacks.len() as u64);
        self.metrics.increment_nacks_suppressed(suppressed);

        let delay = self.config.nack_delay(rx.retries);
        ctx.schedule(TimerId::NackRetry, delay);
        rx.retry_armed = true;

        debug!(
            retries = rx.retries,
            first_missing = ?rx.logic.tracker().first_missing(),
            missing = rx.logic.tracker().missing_count(),
            sent = nacks.len(),
            suppressed,
            ?delay,
            "NACK retry"
        );
        Ok(())
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    fn ensure_active(&self) -> Result<()> {
        match self.state {
            SessionState::Active => Ok(()),
            SessionState::Initial => Err(Error::NotActive),
            SessionState::Defunct => Err(self.defunct_error()),
        }
    }

    fn defunct_error(&self) -> Error {
        Error::SessionDefunct(self.defunct_reason.unwrap_or(DefunctReason::Stopped))
    }

    fn fail<C: SessionContext + ?Sized>(&mut self, reason: DefunctReason, ctx: &mut C) -> Error {
        ctx.cancel(TimerId::Heartbeat);
        ctx.cancel(TimerId::NackRetry);
        self.state = SessionState::Defunct;
        self.defunct_reason = Some(reason);
        error!(%reason, role = ?self.role(), "session defunct");
        Error::SessionDefunct(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UnrecoverableGap;
    use crate::packet::PacketKind;
    use std::collections::HashMap;

    #[derive(Default)]
    struct Recorder {
        sent: Vec<Packet>,
        timers: HashMap<TimerId, Duration>,
        delivered: Vec<Vec<u8>>,
        lost: Vec<UnrecoverableGap>,
    }

    impl Recorder {
        fn take_sent(&mut self) -> Vec<Packet> {
            std::mem::take(&mut self.sent)
        }
    }

    impl SessionContext for Recorder {
        fn transmit(&mut self, datagram: Vec<u8>) {
            self.sent.push(packet::decode(&datagram).expect("session emits valid packets"));
        }

        fn schedule(&mut self, timer: TimerId, after: Duration) {
            self.timers.insert(timer, after);
        }

        fn cancel(&mut self, timer: TimerId) {
            self.timers.remove(&timer);
        }

        fn deliver(&mut self, message: Vec<u8>) {
            self.delivered.push(message);
        }

        fn data_lost(&mut self, gap: UnrecoverableGap) {
            self.lost.push(gap);
        }
    }

    fn config() -> SessionConfig {
        SessionConfig {
            sender_history_size: 3,
            receiver_buffer_size: 16,
            max_payload_size: 8,
            nak_jitter: false,
            nak_max_retries: 2,
            join: JoinMode::FromStart,
            ..Default::default()
        }
    }

    fn started(role: Role) -> (Session, Recorder) {
        let mut ctx = Recorder::default();
        let mut s = Session::new(role, config());
        s.start(&mut ctx).expect("start");
        (s, ctx)
    }

    fn data(id: PacketId, body: &[u8]) -> Packet {
        Packet::data_end_of_message(body.to_vec()).with_id(id)
    }

    #[test]
    fn test_send_before_start_fails() {
        let mut ctx = Recorder::default();
        let mut s = Session::sender(config());
        assert_eq!(s.state(), SessionState::Initial);
        assert!(matches!(s.send(b"x", &mut ctx), Err(Error::NotActive)));
        assert!(ctx.sent.is_empty());
    }

    #[test]
    fn test_events_before_start_ignored() {
        let mut ctx = Recorder::default();
        let mut s = Session::receiver(config());
        s.on_packet(data(0, b"a"), &mut ctx).expect("ignored");
        s.on_timer(TimerId::NackRetry, &mut ctx).expect("ignored");
        assert!(ctx.delivered.is_empty());
    }

    #[test]
    fn test_sender_start_arms_heartbeat() {
        let (_, ctx) = started(Role::Sender);
        assert_eq!(
            ctx.timers.get(&TimerId::Heartbeat),
            Some(&config().heartbeat_interval)
        );
    }

    #[test]
    fn test_sender_stamps_and_fragments() {
        let (mut s, mut ctx) = started(Role::Sender);
        s.send(b"0123456789", &mut ctx).expect("send");
        s.send(b"ab", &mut ctx).expect("send");

        let sent = ctx.take_sent();
        let ids: Vec<_> = sent.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(sent[0].kind, PacketKind::DataIntermediate(b"01234567".to_vec()));
        assert_eq!(sent[1].kind, PacketKind::DataEndOfMessage(b"89".to_vec()));
        assert_eq!(sent[2].kind, PacketKind::DataEndOfMessage(b"ab".to_vec()));
        assert_eq!(s.metrics().snapshot().messages_sent, 2);
    }

    #[test]
    fn test_heartbeat_only_after_first_send() {
        let (mut s, mut ctx) = started(Role::Sender);
        s.on_timer(TimerId::Heartbeat, &mut ctx).expect("timer");
        assert!(ctx.take_sent().is_empty());
        assert!(ctx.timers.contains_key(&TimerId::Heartbeat));

        for _ in 0..5 {
            s.send(b"m", &mut ctx).expect("send");
        }
        ctx.take_sent();
        s.on_timer(TimerId::Heartbeat, &mut ctx).expect("timer");
        assert_eq!(ctx.take_sent(), vec![Packet::heartbeat(4)]);
    }

    #[test]
    fn test_sender_answers_nack_with_not_available() {
        let (mut s, mut ctx) = started(Role::Sender);
        for i in 0..4u8 {
            s.send(&[i], &mut ctx).expect("send");
        }
        ctx.take_sent();

        s.on_packet(Packet::nack(0, 4), &mut ctx).expect("nack");
        let out = ctx.take_sent();
        assert_eq!(out.len(), 4);
        assert_eq!(out[0], Packet::data_not_available(0));
        assert_eq!(out[1], data(1, &[1]));
        assert_eq!(out[3], data(3, &[3]));

        let snap = s.metrics().snapshot();
        assert_eq!(snap.retransmit_sent, 3);
        assert_eq!(snap.not_available_sent, 1);
    }

    #[test]
    fn test_sender_clamps_nack_to_sent_ids() {
        let (mut s, mut ctx) = started(Role::Sender);
        s.send(b"a", &mut ctx).expect("send");
        ctx.take_sent();

        s.on_packet(Packet::nack(0, 100), &mut ctx).expect("nack");
        assert_eq!(ctx.take_sent(), vec![data(0, b"a")]);

        s.on_packet(Packet::nack(5, 9), &mut ctx).expect("nack");
        assert!(ctx.take_sent().is_empty());
    }

    #[test]
    fn test_sender_bounds_unavailable_reply() {
        let (mut s, mut ctx) = started(Role::Sender);
        for i in 0..1000u32 {
            s.send(&i.to_le_bytes(), &mut ctx).expect("send");
        }
        ctx.take_sent();

        s.on_packet(Packet::nack(0, PacketId::MAX), &mut ctx).expect("nack");
        let out = ctx.take_sent();
        let ids: Vec<_> = out.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![0, 1, 2, 997, 998, 999]);
        assert!(out[..3].iter().all(|p| p.kind == PacketKind::DataNotAvailable));
        assert!(out[3..].iter().all(Packet::is_data));

        // The next request starts past the answered window.
        s.on_packet(Packet::nack(3, 997), &mut ctx).expect("nack");
        let ids: Vec<_> = ctx.take_sent().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![3, 4, 5]);

        // A window that ends inside the history answers both parts.
        s.on_packet(Packet::nack(995, 999), &mut ctx).expect("nack");
        let out = ctx.take_sent();
        assert_eq!(
            out.iter().map(|p| p.id).collect::<Vec<_>>(),
            vec![995, 996, 997, 998]
        );
        assert_eq!(out[1], Packet::data_not_available(996));
        assert!(out[2].is_data());
    }

    #[test]
    fn test_sender_ignores_data() {
        let (mut s, mut ctx) = started(Role::Sender);
        s.on_packet(data(0, b"x"), &mut ctx).expect("ignored");
        s.on_packet(Packet::heartbeat(3), &mut ctx).expect("ignored");
        assert!(ctx.sent.is_empty());
        assert!(ctx.delivered.is_empty());
    }

    #[test]
    fn test_receiver_cannot_send() {
        let (mut s, mut ctx) = started(Role::Receiver);
        assert!(matches!(s.send(b"x", &mut ctx), Err(Error::NotSender)));
    }

    #[test]
    fn test_receiver_nacks_gap_immediately() {
        let (mut s, mut ctx) = started(Role::Receiver);
        s.on_packet(data(0, b"a"), &mut ctx).expect("data");
        s.on_packet(data(4, b"e"), &mut ctx).expect("data");

        assert_eq!(ctx.take_sent(), vec![Packet::nack(1, 4)]);
        assert_eq!(
            ctx.timers.get(&TimerId::NackRetry),
            Some(&config().nak_interval)
        );
        assert_eq!(ctx.delivered, vec![b"a".to_vec()]);

        for id in 1..4u32 {
            s.on_packet(data(id, &[b'a' + id as u8]), &mut ctx).expect("repair");
        }
        assert_eq!(
            ctx.delivered,
            vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), b"d".to_vec(), b"e".to_vec()]
        );
        assert!(!ctx.timers.contains_key(&TimerId::NackRetry));
        assert_eq!(s.metrics().snapshot().retransmit_received, 3);
    }

    #[test]
    fn test_heartbeat_reveals_tail_loss() {
        let (mut s, mut ctx) = started(Role::Receiver);
        s.on_packet(data(0, b"a"), &mut ctx).expect("data");
        s.on_packet(Packet::heartbeat(2), &mut ctx).expect("heartbeat");
        assert_eq!(ctx.take_sent(), vec![Packet::nack(1, 3)]);
    }

    #[test]
    fn test_retry_backoff_then_defunct() {
        let (mut s, mut ctx) = started(Role::Receiver);
        s.on_packet(data(0, b"a"), &mut ctx).expect("data");
        s.on_packet(data(3, b"d"), &mut ctx).expect("data");
        ctx.take_sent();

        s.on_timer(TimerId::NackRetry, &mut ctx).expect("retry 1");
        assert_eq!(ctx.take_sent(), vec![Packet::nack(1, 3)]);
        assert_eq!(ctx.timers.get(&TimerId::NackRetry), Some(&Duration::from_secs(1)));

        s.on_timer(TimerId::NackRetry, &mut ctx).expect("retry 2");
        assert_eq!(ctx.timers.get(&TimerId::NackRetry), Some(&Duration::from_secs(2)));

        let err = s.on_timer(TimerId::NackRetry, &mut ctx).expect_err("exhausted");
        assert!(matches!(
            err,
            Error::SessionDefunct(DefunctReason::NackRetriesExhausted { retries: 3 })
        ));
        assert_eq!(s.state(), SessionState::Defunct);
        assert!(ctx.timers.is_empty());
        assert!(s.on_packet(data(1, b"b"), &mut ctx).is_err());
    }

    #[test]
    fn test_progress_resets_retries() {
        let (mut s, mut ctx) = started(Role::Receiver);
        s.on_packet(data(0, b"a"), &mut ctx).expect("data");
        s.on_packet(data(5, b"f"), &mut ctx).expect("data");

        for id in 1..4u32 {
            s.on_timer(TimerId::NackRetry, &mut ctx).expect("retry");
            s.on_packet(data(id, b"x"), &mut ctx).expect("repair");
        }
        // Three expiries, each with progress in between: still alive.
        s.on_timer(TimerId::NackRetry, &mut ctx).expect("retry");
        assert!(s.is_active());
    }

    #[test]
    fn test_peer_nack_suppresses_retry() {
        let (mut s, mut ctx) = started(Role::Receiver);
        s.on_packet(data(0, b"a"), &mut ctx).expect("data");
        s.on_packet(data(10, b"k"), &mut ctx).expect("data");
        ctx.take_sent();

        // Our own NACK looping back is not a peer request.
        s.on_packet(Packet::nack(1, 10), &mut ctx).expect("echo");
        // Another receiver asks for part of the same range.
        s.on_packet(Packet::nack(1, 5), &mut ctx).expect("peer");

        s.on_timer(TimerId::NackRetry, &mut ctx).expect("retry");
        assert_eq!(ctx.take_sent(), vec![Packet::nack(5, 10)]);
        assert_eq!(s.metrics().snapshot().nacks_suppressed, 4);

        // Suppression lasts one interval.
        s.on_timer(TimerId::NackRetry, &mut ctx).expect("retry");
        assert_eq!(ctx.take_sent(), vec![Packet::nack(1, 10)]);
    }

    #[test]
    fn test_not_available_reported_as_lost() {
        let (mut s, mut ctx) = started(Role::Receiver);
        s.on_packet(data(0, b"a"), &mut ctx).expect("data");
        s.on_packet(data(2, b"c"), &mut ctx).expect("data");
        s.on_packet(data(3, b"d"), &mut ctx).expect("data");
        s.on_packet(Packet::data_not_available(1), &mut ctx).expect("dna");

        assert_eq!(ctx.lost, vec![UnrecoverableGap::new(1, 2)]);
        assert_eq!(ctx.delivered, vec![b"a".to_vec(), b"d".to_vec()]);
        assert!(!ctx.timers.contains_key(&TimerId::NackRetry));
        assert_eq!(s.metrics().packets_lost(), 1);
    }

    #[test]
    fn test_loss_threshold_makes_defunct() {
        let mut ctx = Recorder::default();
        let mut s = Session::receiver(SessionConfig {
            max_lost_packets: Some(1),
            ..config()
        });
        s.start(&mut ctx).expect("start");
        s.on_packet(data(0, b"a"), &mut ctx).expect("data");
        s.on_packet(data(3, b"d"), &mut ctx).expect("data");
        s.on_packet(Packet::data_not_available(1), &mut ctx).expect("first loss");

        let err = s
            .on_packet(Packet::data_not_available(2), &mut ctx)
            .expect_err("over limit");
        assert!(matches!(
            err,
            Error::SessionDefunct(DefunctReason::LossThresholdExceeded { lost: 2, limit: 1 })
        ));
    }

    #[test]
    fn test_hard_overflow_makes_defunct() {
        let mut ctx = Recorder::default();
        let mut s = Session::receiver(SessionConfig {
            receiver_buffer_size: 2,
            ..config()
        });
        s.start(&mut ctx).expect("start");
        s.on_packet(data(0, b"a"), &mut ctx).expect("data");
        s.on_packet(data(2, b"c"), &mut ctx).expect("data");
        s.on_packet(data(3, b"d"), &mut ctx).expect("data");
        let err = s.on_packet(data(4, b"e"), &mut ctx).expect_err("overflow");
        assert!(matches!(
            err,
            Error::SessionDefunct(DefunctReason::ReceiveBufferOverflow { .. })
        ));
        assert_eq!(s.state(), SessionState::Defunct);
    }

    #[test]
    fn test_malformed_datagram_counted() {
        let (mut s, mut ctx) = started(Role::Receiver);
        s.on_datagram(&[1, 2, 3], &mut ctx).expect("dropped");
        s.on_datagram(&packet::encode(&data(0, b"ok")), &mut ctx)
            .expect("valid");
        assert_eq!(s.metrics().decode_errors(), 1);
        assert_eq!(ctx.delivered, vec![b"ok".to_vec()]);
    }

    #[test]
    fn test_stop_is_terminal() {
        let (mut s, mut ctx) = started(Role::Sender);
        s.stop(&mut ctx);
        assert_eq!(s.state(), SessionState::Defunct);
        assert_eq!(s.defunct_reason(), Some(DefunctReason::Stopped));
        assert!(ctx.timers.is_empty());
        assert!(matches!(
            s.send(b"x", &mut ctx),
            Err(Error::SessionDefunct(DefunctReason::Stopped))
        ));
        assert!(s.start(&mut ctx).is_err());
    }

    #[test]
    fn test_nack_delay_cap_and_jitter() {
        let cfg = SessionConfig {
            nak_jitter: false,
            ..SessionConfig::default()
        };
        assert_eq!(cfg.nack_delay(0), Duration::from_millis(500));
        assert_eq!(cfg.nack_delay(2), Duration::from_millis(2000));
        assert_eq!(cfg.nack_delay(30), Duration::from_millis(8000));

        let jittered = SessionConfig::default();
        for _ in 0..100 {
            let d = jittered.nack_delay(0);
            assert!(d >= Duration::from_millis(500) && d < Duration::from_millis(1000));
        }
    }
}
