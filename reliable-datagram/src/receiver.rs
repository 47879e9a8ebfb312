//! Inbound state for stop-and-wait reliability.
//!
//! The [`Receiver`] remembers what has already been handed to the
//! application so duplicates can be recognised and the last good packet can
//! be re-acknowledged.  Like [`crate::sender::Sender`] it never touches the
//! transport.

use crate::packet::Packet;

/// Receive-side state of a single connection.
#[derive(Debug, Default)]
pub struct Receiver {
    /// Last packet whose payload was delivered.  Re-acknowledged whenever a
    /// corrupt or duplicate packet shows up.
    pub last_delivered: Option<Packet>,
    /// Consecutive empty waits in `receive()`.
    pub retries: u32,
    /// The peer's FIN, once observed.  Acknowledged by a passive close.
    pub peer_fin: Option<Packet>,
}

impl Receiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `packet` as delivered and hand back its payload.
    pub fn deliver(&mut self, packet: Packet) -> Vec<u8> {
        let payload = packet.payload.clone();
        self.last_delivered = Some(packet);
        self.retries = 0;
        payload
    }

    /// Count a wait that ended without any packet.  Returns the new total.
    pub fn on_timeout(&mut self) -> u32 {
        self.retries += 1;
        self.retries
    }

    pub fn on_fin(&mut self, fin: Packet) {
        self.peer_fin = Some(fin);
    }

    /// `true` when `packet` repeats the last delivered packet.
    pub fn is_redelivery(&self, packet: &Packet) -> bool {
        self.last_delivered
            .as_ref()
            .is_some_and(|last| last.header.seq == packet.header.seq)
    }
}
