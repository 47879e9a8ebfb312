//! Connection release.
//!
//! ```text
//!  active side                              passive side
//!  ESTABLISHED ── FIN ──────────────────▶  (receive → PeerClosed)
//!  FIN_WAIT_1                               CLOSE_WAIT
//!              ◀───────────────────── ACK   close()
//!  FIN_WAIT_2  ◀───────────────────── FIN
//!              ── ACK ──────────────────▶   CLOSED
//!  TIME_WAIT   (linger, re-ack FINs)
//!  CLOSED
//! ```
//!
//! Neither side can hang: every wait is bounded by the retry budgets, and
//! `close()` always ends in `CLOSED`.

use std::net::SocketAddr;

use tokio::time::Instant;

use crate::classifier::{checksum_valid, classify_ack, classify_inbound, is_from, AckVerdict, Inbound};
use crate::connection::{ConnError, Connection};
use crate::packet::{Flag, Packet};
use crate::state::ConnectionState;
use crate::transport::Transport;

impl<T: Transport> Connection<T> {
    /// Release the connection.
    ///
    /// From `ESTABLISHED` this is an active close; from `CLOSE_WAIT` (after
    /// `receive()` reported [`ConnError::PeerClosed`]) a passive one.  Any
    /// other state fails with [`ConnError::InvalidState`] and is left as is.
    ///
    /// An unresponsive peer does not make this fail: the connection is
    /// closed anyway once the budgets run out.  Only a local transport
    /// failure is reported, and the connection is `CLOSED` in that case too.
    pub async fn close(&mut self) -> Result<(), ConnError> {
        let result = match self.state() {
            ConnectionState::Established => self.active_close().await,
            ConnectionState::CloseWait => self.passive_close().await,
            other => return Err(ConnError::InvalidState(other)),
        };
        self.set_state(ConnectionState::Closed);
        log::info!("[conn {}] closed", self.local_addr());
        result
    }

    async fn active_close(&mut self) -> Result<(), ConnError> {
        let remote = self.peer()?;
        let fin = self.build(remote, Flag::Fin, 0, Vec::new());
        self.set_state(ConnectionState::FinWait1);

        if !self.await_fin_ack(&fin, remote).await? {
            log::warn!(
                "[conn {}] FIN never acknowledged by {remote}; forcing close",
                self.local_addr()
            );
            return Ok(());
        }
        self.set_state(ConnectionState::FinWait2);

        // The peer's FIN may already have crossed ours in FIN_WAIT_1.
        if self.receiver.peer_fin.is_none() && !self.await_peer_fin(remote).await? {
            log::debug!("[conn {}] peer {remote} never sent FIN", self.local_addr());
            return Ok(());
        }
        self.set_state(ConnectionState::TimeWait);
        self.linger(remote).await;
        Ok(())
    }

    /// FIN_WAIT_1: retransmit `fin` until it is acknowledged.  Returns
    /// `false` when the send budget runs out first.
    async fn await_fin_ack(&mut self, fin: &Packet, remote: SocketAddr) -> Result<bool, ConnError> {
        for _ in 0..self.config.max_send_tries {
            self.transmit(fin).await?;
            let Some(reply) = self.wait().await? else {
                self.sender.on_timeout();
                continue;
            };
            match classify_ack(&reply, remote, fin.header.seq) {
                AckVerdict::Acked => return Ok(true),
                AckVerdict::Fin => {
                    self.acknowledge(&reply).await;
                    self.receiver.on_fin(reply);
                }
                AckVerdict::PeerData if self.receiver.is_redelivery(&reply) => {
                    self.acknowledge(&reply).await;
                }
                _ => {}
            }
        }
        Ok(false)
    }

    /// FIN_WAIT_2: wait for the peer's FIN and acknowledge it.
    async fn await_peer_fin(&mut self, remote: SocketAddr) -> Result<bool, ConnError> {
        self.receiver.retries = 0;
        while self.receiver.retries < self.config.max_receive_tries {
            let Some(packet) = self.wait().await? else {
                self.receiver.on_timeout();
                continue;
            };
            match classify_inbound(&packet, remote, self.receiver.last_delivered.as_ref()) {
                Inbound::Fin => {
                    self.acknowledge(&packet).await;
                    self.receiver.on_fin(packet);
                    return Ok(true);
                }
                Inbound::Duplicate if self.receiver.is_redelivery(&packet) => {
                    self.acknowledge(&packet).await;
                }
                _ => {}
            }
        }
        Ok(false)
    }

    /// TIME_WAIT: stay reachable for `time_wait_linger` so a peer whose ack
    /// of its FIN was lost can still be answered.
    async fn linger(&mut self, remote: SocketAddr) {
        let deadline = Instant::now() + self.config.time_wait_linger;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.wait_for(remaining).await {
                Ok(Some(packet)) if is_peer_fin(&packet, remote) => {
                    self.acknowledge(&packet).await;
                }
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(e) => {
                    log::warn!("[conn {}] error while lingering: {e}", self.local_addr());
                    break;
                }
            }
        }
    }

    async fn passive_close(&mut self) -> Result<(), ConnError> {
        let remote = self.peer()?;
        if let Some(peer_fin) = self.receiver.peer_fin.clone() {
            self.acknowledge(&peer_fin).await;
        }

        let fin = self.build(remote, Flag::Fin, 0, Vec::new());
        for _ in 0..self.config.max_send_tries {
            self.transmit(&fin).await?;
            let Some(reply) = self.wait().await? else {
                self.sender.on_timeout();
                continue;
            };
            match classify_ack(&reply, remote, fin.header.seq) {
                AckVerdict::Acked => return Ok(()),
                // Our ack of their FIN was lost.
                AckVerdict::Fin => self.acknowledge(&reply).await,
                _ => {}
            }
        }
        log::warn!(
            "[conn {}] last FIN never acknowledged by {remote}",
            self.local_addr()
        );
        Ok(())
    }
}

fn is_peer_fin(packet: &Packet, remote: SocketAddr) -> bool {
    packet.header.flag == Flag::Fin && is_from(packet, remote) && checksum_valid(packet)
}
