// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Endpoint runtime.
//!
//! An endpoint owns one UDP socket and runs a single tokio task that
//! multiplexes every session sharing it:
//!
//! - at most one local sender session
//! - one receiver session per remote sender, created on its first DATA or
//!   HEARTBEAT
//!
//! NACKs on the group are answered by the local sender and also shown to
//! every receiver session for NACK suppression, so a group carries a single
//! sender stream.
//!
//! The task turns socket readiness, timer deadlines and application
//! commands into session events; sessions never touch the socket.
//!
//! Events are never waited on: when the application falls behind, they are
//! dropped and counted in [`EndpointStats::events_dropped`].
//!
//! # Example
//!
//! ```ignore
//! let endpoint = Endpoint::bind(RmcastConfig::default())?;
//! let (handle, mut events) = endpoint.spawn(EndpointRole::Both);
//! handle.send(b"hello".to_vec()).await?;
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! ```

use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::config::{RmcastConfig, MAX_UDP_PAYLOAD};
use crate::error::{DefunctReason, Error, Result, UnrecoverableGap};
use crate::packet::{self, PacketType};
use crate::reliability::SessionMetricsSnapshot;
use crate::session::{Role, Session, SessionConfig, SessionContext, SessionState, TimerId};
use crate::transport;

/// Which sessions an endpoint runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointRole {
    Sender,
    Receiver,
    Both,
}

impl EndpointRole {
    pub fn sends(self) -> bool {
        matches!(self, Self::Sender | Self::Both)
    }

    pub fn receives(self) -> bool {
        matches!(self, Self::Receiver | Self::Both)
    }
}

/// Notification from the endpoint task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointEvent {
    /// Complete message from `from`, in order.
    Delivered { from: SocketAddr, message: Vec<u8> },
    /// Ids from `from` that will never be delivered.
    Lost {
        from: SocketAddr,
        gap: UnrecoverableGap,
    },
    /// A session failed; `peer` is `None` for the local sender.
    Defunct {
        peer: Option<SocketAddr>,
        reason: DefunctReason,
    },
}

/// Statistics of one receiver session.
#[derive(Debug, Clone, Serialize)]
pub struct PeerStats {
    pub peer: SocketAddr,
    pub state: SessionState,
    pub metrics: SessionMetricsSnapshot,
}

/// Statistics of a whole endpoint.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EndpointStats {
    pub sender: Option<SessionMetricsSnapshot>,
    pub receivers: Vec<PeerStats>,
    /// Datagrams that could not be routed to any session.
    pub malformed: u64,
    /// Events dropped because the application was not draining them.
    pub events_dropped: u64,
}

enum Command {
    Send {
        message: Vec<u8>,
        reply: oneshot::Sender<Result<()>>,
    },
    Stats {
        reply: oneshot::Sender<EndpointStats>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to control a running endpoint.
#[derive(Debug, Clone)]
pub struct EndpointHandle {
    commands: mpsc::Sender<Command>,
}

impl EndpointHandle {
    /// Send one message through the local sender session.
    pub async fn send(&self, message: Vec<u8>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Send { message, reply })
            .await
            .map_err(|_| Error::ChannelClosed)?;
        rx.await.map_err(|_| Error::ChannelClosed)?
    }

    /// Snapshot every session's counters.
    pub async fn stats(&self) -> Result<EndpointStats> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Stats { reply })
            .await
            .map_err(|_| Error::ChannelClosed)?;
        rx.await.map_err(|_| Error::ChannelClosed)
    }

    /// Stop every session and wait for the task to finish.
    pub async fn shutdown(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Shutdown { reply })
            .await
            .map_err(|_| Error::ChannelClosed)?;
        rx.await.map_err(|_| Error::ChannelClosed)
    }

    /// True while the endpoint task is running.
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }
}

/// Unstarted endpoint: a socket plus configuration.
#[derive(Debug)]
pub struct Endpoint {
    config: RmcastConfig,
    socket: UdpSocket,
    destination: SocketAddr,
}

impl Endpoint {
    /// Validate `config` and join its multicast group.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(config: RmcastConfig) -> Result<Self> {
        config.validate()?;
        let std_socket = transport::bind_multicast(&config)?;
        let socket = UdpSocket::from_std(std_socket)?;
        let destination = config.multicast_group_address;
        info!(
            group = %destination,
            local = %socket.local_addr()?,
            "endpoint bound"
        );
        Ok(Self {
            config,
            socket,
            destination,
        })
    }

    /// Use an existing socket, sending every datagram to `destination`.
    pub fn with_socket(config: RmcastConfig, socket: UdpSocket, destination: SocketAddr) -> Self {
        Self {
            config,
            socket,
            destination,
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Start the endpoint task.
    pub fn spawn(self, role: EndpointRole) -> (EndpointHandle, mpsc::Receiver<EndpointEvent>) {
        let depth = self.config.command_queue_depth.max(1);
        let (command_tx, command_rx) = mpsc::channel(depth);
        let (event_tx, event_rx) = mpsc::channel(depth);

        let session_config = SessionConfig::from(&self.config);
        let sender = role
            .sends()
            .then(|| Session::new(Role::Sender, session_config.clone()));

        let event_loop = EventLoop {
            session_config,
            socket: Arc::new(self.socket),
            destination: self.destination,
            receive: role.receives(),
            sender,
            receivers: HashMap::new(),
            timers: Deadlines::default(),
            events: event_tx,
            malformed: 0,
            events_dropped: 0,
        };
        tokio::spawn(event_loop.run(command_rx));

        (
            EndpointHandle {
                commands: command_tx,
            },
            event_rx,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum SessionKey {
    Local,
    Peer(SocketAddr),
}

/// Pending timer deadlines, ordered by expiry.
#[derive(Debug, Default)]
struct Deadlines {
    by_timer: HashMap<(SessionKey, TimerId), Instant>,
    queue: BTreeSet<(Instant, SessionKey, TimerId)>,
}

impl Deadlines {
    fn set(&mut self, key: SessionKey, timer: TimerId, at: Instant) {
        if let Some(old) = self.by_timer.insert((key, timer), at) {
            self.queue.remove(&(old, key, timer));
        }
        self.queue.insert((at, key, timer));
    }

    fn clear(&mut self, key: SessionKey, timer: TimerId) {
        if let Some(old) = self.by_timer.remove(&(key, timer)) {
            self.queue.remove(&(old, key, timer));
        }
    }

    fn clear_session(&mut self, key: SessionKey) {
        self.clear(key, TimerId::Heartbeat);
        self.clear(key, TimerId::NackRetry);
    }

    fn clear_all(&mut self) {
        self.by_timer.clear();
        self.queue.clear();
    }

    fn next(&self) -> Option<Instant> {
        self.queue.first().map(|(at, _, _)| *at)
    }

    /// Remove and return every timer due at `now`.
    fn take_due(&mut self, now: Instant) -> Vec<(SessionKey, TimerId)> {
        let mut due = Vec::new();
        while let Some(&(at, key, timer)) = self.queue.first() {
            if at > now {
                break;
            }
            self.queue.pop_first();
            self.by_timer.remove(&(key, timer));
            due.push((key, timer));
        }
        due
    }
}

/// Effects collected from one session call.
#[derive(Default)]
struct Outbox {
    datagrams: Vec<Vec<u8>>,
    timers: Vec<(TimerId, Option<Duration>)>,
    delivered: Vec<Vec<u8>>,
    lost: Vec<UnrecoverableGap>,
}

impl SessionContext for Outbox {
    fn transmit(&mut self, datagram: Vec<u8>) {
        self.datagrams.push(datagram);
    }

    fn schedule(&mut self, timer: TimerId, after: Duration) {
        self.timers.push((timer, Some(after)));
    }

    fn cancel(&mut self, timer: TimerId) {
        self.timers.push((timer, None));
    }

    fn deliver(&mut self, message: Vec<u8>) {
        self.delivered.push(message);
    }

    fn data_lost(&mut self, gap: UnrecoverableGap) {
        self.lost.push(gap);
    }
}

struct EventLoop {
    session_config: SessionConfig,
    socket: Arc<UdpSocket>,
    destination: SocketAddr,
    receive: bool,
    sender: Option<Session>,
    receivers: HashMap<SocketAddr, Session>,
    timers: Deadlines,
    events: mpsc::Sender<EndpointEvent>,
    malformed: u64,
    events_dropped: u64,
}

impl EventLoop {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        self.with_session(SessionKey::Local, |s, ctx| s.start(ctx))
            .await;

        let socket = Arc::clone(&self.socket);
        let mut buf = vec![0u8; MAX_UDP_PAYLOAD];

        loop {
            let deadline = self.timers.next();
            let sleep = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Send { message, reply }) => {
                        let result = match self.with_session(SessionKey::Local, |s, ctx| s.send(&message, ctx)).await {
                            Some(result) => result,
                            None if self.sender.is_some() => Err(Error::SessionDefunct(
                                self.sender
                                    .as_ref()
                                    .and_then(Session::defunct_reason)
                                    .unwrap_or(DefunctReason::Stopped),
                            )),
                            None => Err(Error::NotSender),
                        };
                        let _ = reply.send(result);
                    }
                    Some(Command::Stats { reply }) => {
                        let _ = reply.send(self.stats());
                    }
                    Some(Command::Shutdown { reply }) => {
                        self.stop_all();
                        let _ = reply.send(());
                        break;
                    }
                    None => {
                        self.stop_all();
                        break;
                    }
                },
                received = socket.recv_from(&mut buf) => match received {
                    Ok((len, from)) => self.on_datagram(&buf[..len], from).await,
                    Err(e) => warn!(error = %e, "socket receive failed"),
                },
                () = sleep => self.fire_due_timers().await,
            }
        }

        debug!("endpoint task finished");
    }

    async fn on_datagram(&mut self, datagram: &[u8], from: SocketAddr) {
        let packet_type = match packet::peek_type(datagram) {
            Ok(t) => t,
            Err(e) => {
                self.malformed += 1;
                debug!(%from, error = %e, "dropping malformed datagram");
                return;
            }
        };
        trace!(%from, ?packet_type, len = datagram.len(), "datagram in");

        if packet_type == PacketType::Nack {
            self.with_session(SessionKey::Local, |s, ctx| s.on_datagram(datagram, ctx))
                .await;
            let peers: Vec<SocketAddr> = self.receivers.keys().copied().collect();
            for peer in peers {
                self.with_session(SessionKey::Peer(peer), |s, ctx| s.on_datagram(datagram, ctx))
                    .await;
            }
            return;
        }

        if !self.receive {
            return;
        }

        if !self.receivers.contains_key(&from) {
            info!(peer = %from, "new remote sender");
            self.receivers
                .insert(from, Session::new(Role::Receiver, self.session_config.clone()));
            self.with_session(SessionKey::Peer(from), |s, ctx| s.start(ctx))
                .await;
        }

        self.with_session(SessionKey::Peer(from), |s, ctx| s.on_datagram(datagram, ctx))
            .await;
    }

    async fn fire_due_timers(&mut self) {
        for (key, timer) in self.timers.take_due(Instant::now()) {
            self.with_session(key, |s, ctx| s.on_timer(timer, ctx))
                .await;
        }
    }

    /// Run `f` against an active session and carry out its effects.
    ///
    /// Returns `None` when the session does not exist or is defunct. A
    /// receiver session that fails is dropped; later traffic from the same
    /// peer starts a fresh one.
    async fn with_session<F>(&mut self, key: SessionKey, f: F) -> Option<Result<()>>
    where
        F: FnOnce(&mut Session, &mut Outbox) -> Result<()>,
    {
        let session = match key {
            SessionKey::Local => self.sender.as_mut()?,
            SessionKey::Peer(addr) => self.receivers.get_mut(&addr)?,
        };
        if session.state() == SessionState::Defunct {
            return None;
        }

        let mut outbox = Outbox::default();
        let result = f(session, &mut outbox);
        self.flush(key, outbox).await;

        if let Err(Error::SessionDefunct(reason)) = &result {
            self.timers.clear_session(key);
            let peer = match key {
                SessionKey::Local => None,
                SessionKey::Peer(addr) => {
                    self.receivers.remove(&addr);
                    Some(addr)
                }
            };
            warn!(?peer, %reason, "session defunct");
            self.emit(EndpointEvent::Defunct {
                peer,
                reason: *reason,
            });
        }
        Some(result)
    }

    async fn flush(&mut self, key: SessionKey, outbox: Outbox) {
        for datagram in &outbox.datagrams {
            if let Err(e) = self.socket.send_to(datagram, self.destination).await {
                warn!(error = %e, destination = %self.destination, "send failed");
            }
        }

        let now = Instant::now();
        for (timer, op) in outbox.timers {
            match op {
                Some(after) => self.timers.set(key, timer, now + after),
                None => self.timers.clear(key, timer),
            }
        }

        let SessionKey::Peer(from) = key else {
            return;
        };
        for message in outbox.delivered {
            self.emit(EndpointEvent::Delivered { from, message });
        }
        for gap in outbox.lost {
            self.emit(EndpointEvent::Lost { from, gap });
        }
    }

    /// Queue an event without ever waiting on the application.
    fn emit(&mut self, event: EndpointEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.events_dropped += 1;
                if self.events_dropped == 1 {
                    warn!("event queue full, dropping events");
                }
                trace!(?event, "event dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.events_dropped += 1;
            }
        }
    }

    fn stop_all(&mut self) {
        let mut discard = Outbox::default();
        if let Some(sender) = self.sender.as_mut() {
            sender.stop(&mut discard);
        }
        for session in self.receivers.values_mut() {
            session.stop(&mut discard);
        }
        self.timers.clear_all();
        info!(receivers = self.receivers.len(), "endpoint stopped");
    }

    fn stats(&self) -> EndpointStats {
        let mut receivers: Vec<PeerStats> = self
            .receivers
            .iter()
            .map(|(peer, session)| PeerStats {
                peer: *peer,
                state: session.state(),
                metrics: session.metrics().snapshot(),
            })
            .collect();
        receivers.sort_by_key(|p| p.peer);

        EndpointStats {
            sender: self.sender.as_ref().map(|s| s.metrics().snapshot()),
            receivers,
            malformed: self.malformed,
            events_dropped: self.events_dropped,
        }
    }
}
