//! Per-connection state shared by the handshake, delivery and teardown
//! protocols.
//!
//! A [`Connection`] owns the complete state for one endpoint's view of a
//! channel.  Its responsibilities are:
//! - Holding the finite-state machine (see [`crate::state`]) and moving it
//!   only along legal edges.
//! - Coordinating [`Sender`] and [`Receiver`].
//! - Building packets stamped with the right endpoints and counters.
//!
//! The public operations are implemented in sibling modules:
//! [`crate::handshake`] (`connect`, `accept`), [`crate::delivery`]
//! (`send`, `receive`) and [`crate::teardown`] (`close`).
//!
//! A connection is driven by one caller at a time; every operation takes
//! `&mut self`.  Instances are single-use: once a connection has attempted
//! `connect()` or reached `CLOSED` after a session, build a new one.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::config::ConnectionConfig;
use crate::packet::{Flag, Packet};
use crate::ports::{PortAllocator, PortLease, PortsExhausted};
use crate::receiver::Receiver;
use crate::sender::Sender;
use crate::state::ConnectionState;
use crate::transport::{Transport, TransportError};

/// Failures surfaced to applications.
///
/// Ghost, corrupt and duplicate packets are recovered internally and never
/// appear here.  Every variant that ends a session leaves the connection in
/// [`ConnectionState::Closed`].
#[derive(Debug, Error)]
pub enum ConnError {
    #[error("timed out waiting for the peer")]
    Timeout,
    #[error("connection lost: retry budget exhausted")]
    ConnectionLost,
    #[error("connect failed: no valid SYN_ACK within the retry budget")]
    ConnectFailed,
    #[error("handshake answered by unexpected peer {0}")]
    GhostPeer(SocketAddr),
    #[error("peer closed the connection")]
    PeerClosed,
    #[error("not connected")]
    NotConnected,
    #[error("operation not allowed in state {0}")]
    InvalidState(ConnectionState),
    #[error("message of {0} bytes does not fit in one packet")]
    MessageTooLarge(usize),
    #[error("resource exhausted: {0}")]
    ResourceExhausted(#[from] PortsExhausted),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// One endpoint of a reliable, stop-and-wait channel over transport `T`.
pub struct Connection<T: Transport> {
    pub(crate) transport: T,
    pub(crate) config: ConnectionConfig,
    /// Where `accept()` takes ports for spawned connections.
    pub(crate) ports: PortAllocator,
    pub(crate) remote: Option<SocketAddr>,
    state: ConnectionState,
    pub(crate) sender: Sender,
    pub(crate) receiver: Receiver,
    /// Held by connections spawned from `accept()`; released on close.
    lease: Option<PortLease>,
    pub(crate) connect_attempted: bool,
}

impl<T: Transport> Connection<T> {
    /// Create a connection in the initial [`ConnectionState::Closed`] state.
    ///
    /// It can either `connect()` once, or `accept()` repeatedly as a
    /// listener.  Listeners get a private [`PortAllocator`] unless one is
    /// shared in with [`Connection::with_ports`].
    pub fn new(transport: T, config: ConnectionConfig) -> Self {
        Self {
            transport,
            config,
            ports: PortAllocator::default(),
            remote: None,
            state: ConnectionState::Closed,
            sender: Sender::with_random_isn(),
            receiver: Receiver::new(),
            lease: None,
            connect_attempted: false,
        }
    }

    /// Take spawned-connection ports from `ports`.  Share one allocator
    /// between listeners that accept concurrently.
    pub fn with_ports(mut self, ports: PortAllocator) -> Self {
        self.ports = ports;
        self
    }

    /// Connection spawned by `accept()` on a freshly leased port, starting
    /// in `SYN_RCVD`.
    pub(crate) fn spawned(
        transport: T,
        config: ConnectionConfig,
        ports: PortAllocator,
        remote: SocketAddr,
        lease: PortLease,
    ) -> Self {
        Self {
            remote: Some(remote),
            state: ConnectionState::SynReceived,
            lease: Some(lease),
            connect_attempted: true,
            ..Self::new(transport, config).with_ports(ports)
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    /// The peer's endpoint, once a handshake has chosen one.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Sequence number the next data packet will carry.
    pub fn next_sequence_number(&self) -> u32 {
        self.sender.next_seq
    }

    pub fn last_delivered(&self) -> Option<&Packet> {
        self.receiver.last_delivered.as_ref()
    }

    pub fn send_retry_count(&self) -> u32 {
        self.sender.retries
    }

    pub fn receive_retry_count(&self) -> u32 {
        self.receiver.retries
    }

    /// Port leased from the allocator, for connections spawned by `accept()`.
    pub fn leased_port(&self) -> Option<u16> {
        self.lease.as_ref().map(PortLease::port)
    }

    // -----------------------------------------------------------------------
    // Helpers for the protocol modules
    // -----------------------------------------------------------------------

    /// Move the FSM along one edge.
    pub(crate) fn set_state(&mut self, next: ConnectionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        if self.state != next {
            log::debug!("[conn {}] {} -> {}", self.local_addr(), self.state, next);
        }
        self.state = next;
        if next == ConnectionState::Closed {
            if let Some(lost) = self.sender.abandon() {
                log::debug!(
                    "[conn {}] dropping unacknowledged seq={} after {} transmissions",
                    self.local_addr(),
                    lost.seq,
                    lost.tx_count
                );
            }
            self.lease = None;
        }
    }

    /// The connected peer, or [`ConnError::NotConnected`].
    pub(crate) fn peer(&self) -> Result<SocketAddr, ConnError> {
        self.remote.ok_or(ConnError::NotConnected)
    }

    /// A stamped packet from this endpoint to `dst`.
    pub(crate) fn build(&self, dst: SocketAddr, flag: Flag, ack: u32, payload: Vec<u8>) -> Packet {
        Packet::new(self.local_addr(), dst, flag, self.sender.next_seq, ack, payload)
    }

    pub(crate) async fn transmit(&self, packet: &Packet) -> Result<(), ConnError> {
        log::debug!(
            "[conn {}] -> {} seq={} ack={} len={} to {}",
            self.local_addr(),
            packet.header.flag,
            packet.header.seq,
            packet.header.ack,
            packet.payload.len(),
            packet.header.dst
        );
        self.transport.send_once(packet).await?;
        Ok(())
    }

    /// Transmit without surfacing a local send failure.
    pub(crate) async fn transmit_best_effort(&self, packet: &Packet) {
        if let Err(e) = self.transmit(packet).await {
            log::warn!("[conn {}] best-effort {} failed: {e}", self.local_addr(), packet.header.flag);
        }
    }

    /// One fixed-length wait for any inbound packet.
    pub(crate) async fn wait(&self) -> Result<Option<Packet>, ConnError> {
        self.wait_for(self.config.timeout).await
    }

    pub(crate) async fn wait_for(&self, timeout: Duration) -> Result<Option<Packet>, ConnError> {
        let packet = self.transport.receive_once(false, timeout).await?;
        if let Some(p) = &packet {
            log::debug!(
                "[conn {}] <- {} seq={} ack={} len={} from {}",
                self.local_addr(),
                p.header.flag,
                p.header.seq,
                p.header.ack,
                p.payload.len(),
                p.header.src
            );
        }
        Ok(packet)
    }

    /// Acknowledge `packet` to the peer.  Acks are never retransmitted.
    pub(crate) async fn acknowledge(&self, packet: &Packet) {
        let ack = self.build(packet.header.src, Flag::Ack, packet.header.seq, Vec::new());
        self.transmit_best_effort(&ack).await;
    }

    /// Re-acknowledge the last delivered packet, if any, to prompt the peer
    /// to retransmit whatever it is stuck on.
    pub(crate) async fn reacknowledge_last(&self) {
        if let Some(last) = &self.receiver.last_delivered {
            self.acknowledge(last).await;
        }
    }
}

impl<T: Transport> std::fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("local", &self.local_addr())
            .field("remote", &self.remote)
            .field("state", &self.state)
            .field("next_seq", &self.sender.next_seq)
            .finish_non_exhaustive()
    }
}
