//! Three-way handshake: active open (`connect`) and passive open (`accept`).
//!
//! ```text
//!  client                         listener :P          spawned :Q
//!    │ ── SYN ─────────────────────▶ │                       │
//!    │                               │ reserve Q, bind ─────▶│
//!    │ ◀───────────────────────────────────────── SYN_ACK ── │
//!    │ ── ACK ──────────────────────────────────────────────▶│
//!  ESTABLISHED                     LISTEN               ESTABLISHED
//! ```
//!
//! The client adopts `Q` from the SYN_ACK's source, so all later traffic
//! bypasses the listening port.  The SYN and the SYN_ACK each use up one
//! sequence number: a stray copy of the final ACK names the SYN_ACK and can
//! never be taken for the ack of the server's first data packet or FIN.

use std::net::SocketAddr;

use tokio::time::Instant;

use crate::classifier::{checksum_valid, is_from, is_from_host};
use crate::connection::{ConnError, Connection};
use crate::packet::{Flag, Packet};
use crate::ports::PortLease;
use crate::state::ConnectionState;
use crate::transport::Transport;

impl<T: Transport> Connection<T> {
    /// Initiate an active open to `remote` and block until `ESTABLISHED`.
    ///
    /// The SYN is sent up to `max_send_tries` times.  Fails with
    /// [`ConnError::Timeout`] when nothing ever answered, or
    /// [`ConnError::ConnectFailed`] when only ghosts did.  Either way the
    /// connection ends `CLOSED` and cannot be reused.
    pub async fn connect(&mut self, remote: SocketAddr) -> Result<(), ConnError> {
        if self.connect_attempted || self.state() != ConnectionState::Closed {
            return Err(ConnError::InvalidState(self.state()));
        }
        self.connect_attempted = true;

        let result = self.active_open(remote).await;
        if result.is_err() {
            self.set_state(ConnectionState::Closed);
        }
        result
    }

    async fn active_open(&mut self, remote: SocketAddr) -> Result<(), ConnError> {
        self.remote = Some(remote);
        let syn = self.build(remote, Flag::Syn, 0, Vec::new());
        self.set_state(ConnectionState::SynSent);

        let mut answered = false;
        for attempt in 1..=self.config.max_send_tries {
            if attempt > 1 {
                log::debug!("[conn {}] SYN attempt {attempt}", self.local_addr());
            }
            self.transmit(&syn).await?;

            let Some(reply) = self.wait().await? else {
                self.sender.on_timeout();
                continue;
            };
            answered = true;

            if is_syn_ack_for(&reply, remote, &syn) {
                // The server answers from the port it allocated for us.
                self.remote = Some(reply.header.src);
                self.sender.advance();
                self.set_state(ConnectionState::Established);
                self.acknowledge(&reply).await;
                log::info!(
                    "[conn {}] established with {}",
                    self.local_addr(),
                    reply.header.src
                );
                return Ok(());
            }
            log::debug!(
                "[conn {}] ghost {} from {} during handshake; retrying",
                self.local_addr(),
                reply.header.flag,
                reply.header.src
            );
        }

        log::warn!("[conn {}] no SYN_ACK from {remote}", self.local_addr());
        Err(if answered {
            ConnError::ConnectFailed
        } else {
            ConnError::Timeout
        })
    }

    /// Wait for a peer to complete the handshake and return a new connection
    /// bound to a freshly reserved local port.
    ///
    /// Blocks indefinitely for a SYN, then for at most one timeout for the
    /// final ACK.  An ACK from anyone but the SYN's sender fails the attempt
    /// with [`ConnError::GhostPeer`] rather than binding a half-open
    /// connection to the wrong peer.  Whatever the outcome, the listener is
    /// back in `LISTEN` afterwards.
    pub async fn accept(&mut self) -> Result<Connection<T>, ConnError> {
        match self.state() {
            ConnectionState::Closed if !self.connect_attempted => {
                self.set_state(ConnectionState::Listen)
            }
            ConnectionState::Listen => {}
            other => return Err(ConnError::InvalidState(other)),
        }

        let syn = loop {
            let Some(packet) = self
                .transport
                .receive_once(true, self.config.timeout)
                .await?
            else {
                continue;
            };
            if packet.header.flag == Flag::Syn && checksum_valid(&packet) {
                break packet;
            }
            log::debug!(
                "[conn {}] listening; discarding {} from {}",
                self.local_addr(),
                packet.header.flag,
                packet.header.src
            );
        };
        log::debug!("[conn {}] <- SYN from {}", self.local_addr(), syn.header.src);

        self.set_state(ConnectionState::SynReceived);
        let result = self.passive_open(&syn).await;
        self.set_state(ConnectionState::Listen);
        result
    }

    async fn passive_open(&self, syn: &Packet) -> Result<Connection<T>, ConnError> {
        let client = syn.header.src;
        let (transport, lease) = self.bind_fresh_port().await?;
        let mut conn = Connection::spawned(
            transport,
            self.config.clone(),
            self.ports.clone(),
            client,
            lease,
        );

        let syn_ack = conn.build(client, Flag::SynAck, syn.header.seq, Vec::new());
        conn.transmit(&syn_ack).await?;

        let deadline = Instant::now() + self.config.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let Some(reply) = conn.wait_for(remaining).await? else {
                log::debug!("[conn {}] no final ACK from {client}", conn.local_addr());
                return Err(ConnError::Timeout);
            };
            if !is_from(&reply, client) {
                log::warn!(
                    "[conn {}] handshake answered by {} instead of {client}",
                    conn.local_addr(),
                    reply.header.src
                );
                return Err(ConnError::GhostPeer(reply.header.src));
            }
            if reply.header.flag == Flag::Ack
                && checksum_valid(&reply)
                && reply.header.ack == syn_ack.header.seq
            {
                conn.sender.advance();
                conn.set_state(ConnectionState::Established);
                log::info!("[conn {}] established with {client}", conn.local_addr());
                return Ok(conn);
            }
            log::debug!(
                "[conn {}] ignoring {} while waiting for final ACK",
                conn.local_addr(),
                reply.header.flag
            );
        }
    }

    /// Reserve a port and bind a sibling transport on it.  Ports the OS
    /// reports busy stay reserved until a bind succeeds, so each is tried
    /// once and the search ends when the allocator runs dry.
    async fn bind_fresh_port(&self) -> Result<(T, PortLease), ConnError> {
        let mut busy = Vec::new();
        loop {
            let lease = self.ports.reserve_port()?;
            match self.transport.bind_port(lease.port()).await {
                Ok(transport) => return Ok((transport, lease)),
                Err(e) if e.is_addr_in_use() => {
                    log::debug!("[conn {}] port {} busy", self.local_addr(), lease.port());
                    busy.push(lease);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// A clean SYN_ACK from `remote`'s host answering `syn`.
fn is_syn_ack_for(reply: &Packet, remote: SocketAddr, syn: &Packet) -> bool {
    reply.header.flag == Flag::SynAck
        && is_from_host(reply, remote.ip())
        && checksum_valid(reply)
        && reply.header.ack == syn.header.seq
}
