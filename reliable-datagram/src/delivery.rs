//! Stop-and-wait data transfer on an established connection.
//!
//! `send()` keeps exactly one data packet in flight and retransmits it,
//! unchanged, until the matching ack arrives or the send budget runs out.
//! `receive()` delivers each sequence number at most once and answers
//! anything it cannot deliver by re-acknowledging the last packet it did.

use std::net::SocketAddr;

use crate::classifier::{classify_ack, classify_inbound, AckVerdict, Inbound};
use crate::connection::{ConnError, Connection};
use crate::packet::{Flag, MAX_PAYLOAD};
use crate::state::ConnectionState;
use crate::transport::Transport;

impl<T: Transport> Connection<T> {
    /// Send one message and block until the peer acknowledges it.
    ///
    /// On success the sequence counter has advanced by exactly one.  When
    /// every attempt in the send budget goes unanswered the connection is
    /// forced `CLOSED` and [`ConnError::ConnectionLost`] is returned.
    pub async fn send(&mut self, message: &[u8]) -> Result<(), ConnError> {
        if self.state() != ConnectionState::Established {
            return Err(ConnError::NotConnected);
        }
        if message.len() > MAX_PAYLOAD {
            return Err(ConnError::MessageTooLarge(message.len()));
        }
        let remote = self.peer()?;

        let result = self.stop_and_wait(remote, message).await;
        self.close_on_transport_error(&result);
        result
    }

    async fn stop_and_wait(&mut self, remote: SocketAddr, message: &[u8]) -> Result<(), ConnError> {
        let packet = self.build(remote, Flag::None, 0, message.to_vec());
        let seq = packet.header.seq;
        self.sender.record_sent(seq);

        for attempt in 1..=self.config.max_send_tries {
            if attempt > 1 {
                self.sender.on_retransmit();
                log::debug!(
                    "[conn {}] retransmit seq={seq} (tx #{})",
                    self.local_addr(),
                    self.sender.tx_count()
                );
            }
            self.transmit(&packet).await?;

            let Some(reply) = self.wait().await? else {
                let n = self.sender.on_timeout();
                log::debug!("[conn {}] no ack for seq={seq} ({n} timeouts)", self.local_addr());
                continue;
            };

            match classify_ack(&reply, remote, seq) {
                AckVerdict::Acked => {
                    self.sender.on_acked();
                    return Ok(());
                }
                AckVerdict::Fin => {
                    self.receiver.on_fin(reply);
                    self.set_state(ConnectionState::CloseWait);
                    return Err(ConnError::PeerClosed);
                }
                AckVerdict::PeerData => {
                    // Our ack for their last packet was lost; they are stuck
                    // retransmitting it.
                    if self.receiver.is_redelivery(&reply) {
                        self.acknowledge(&reply).await;
                    }
                }
                verdict => {
                    log::debug!(
                        "[conn {}] {verdict:?} reply from {} while awaiting ack of seq={seq}",
                        self.local_addr(),
                        reply.header.src
                    );
                }
            }
        }

        log::warn!(
            "[conn {}] seq={seq} unacknowledged after {} attempts; closing",
            self.local_addr(),
            self.config.max_send_tries
        );
        self.set_state(ConnectionState::Closed);
        Err(ConnError::ConnectionLost)
    }

    /// Block until the next in-order message from the peer arrives and
    /// return its payload.
    ///
    /// A FIN from the peer moves the connection to `CLOSE_WAIT` and yields
    /// [`ConnError::PeerClosed`]; the application should then `close()`.
    pub async fn receive(&mut self) -> Result<Vec<u8>, ConnError> {
        if self.state() != ConnectionState::Established {
            return Err(ConnError::NotConnected);
        }
        let remote = self.peer()?;

        let result = self.next_in_order(remote).await;
        self.close_on_transport_error(&result);
        result
    }

    async fn next_in_order(&mut self, remote: SocketAddr) -> Result<Vec<u8>, ConnError> {
        loop {
            let Some(packet) = self.wait().await? else {
                let n = self.receiver.on_timeout();
                if n >= self.config.max_receive_tries {
                    log::warn!(
                        "[conn {}] nothing from {remote} in {n} waits; closing",
                        self.local_addr()
                    );
                    self.set_state(ConnectionState::Closed);
                    return Err(ConnError::ConnectionLost);
                }
                continue;
            };

            match classify_inbound(&packet, remote, self.receiver.last_delivered.as_ref()) {
                Inbound::InOrder => {
                    self.acknowledge(&packet).await;
                    return Ok(self.receiver.deliver(packet));
                }
                Inbound::Corrupt | Inbound::Duplicate => {
                    log::debug!(
                        "[conn {}] discarding seq={}; re-acknowledging last",
                        self.local_addr(),
                        packet.header.seq
                    );
                    self.reacknowledge_last().await;
                }
                Inbound::Fin => {
                    log::info!("[conn {}] peer {remote} closed", self.local_addr());
                    self.receiver.on_fin(packet);
                    self.set_state(ConnectionState::CloseWait);
                    return Err(ConnError::PeerClosed);
                }
                Inbound::Ghost | Inbound::Control(_) => {}
            }
        }
    }

    /// A local transport failure ends the session like an exhausted budget.
    fn close_on_transport_error<R>(&mut self, result: &Result<R, ConnError>) {
        if let Err(ConnError::Transport(e)) = result {
            log::warn!("[conn {}] transport failure: {e}", self.local_addr());
            self.set_state(ConnectionState::Closed);
        }
    }
}
