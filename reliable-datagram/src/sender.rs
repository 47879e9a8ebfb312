//! Outbound state for stop-and-wait reliability.
//!
//! [`Sender`] tracks `nextSequenceNumber`, the single in-flight sequence
//! number and the send-retry counter.  It does **not** touch the transport;
//! [`crate::connection::Connection`] calls these methods and owns the actual
//! send/wait loop.
//!
//! # Stop-and-wait contract
//! - At most **one** packet is in flight at any moment (`in_flight`).
//! - A new packet may only be recorded once `in_flight` is `None`.
//! - On its ack: `next_seq` advances by exactly one; retries reset.
//! - On timeout: `retries` grows; the same packet goes out again unchanged.
//! - SYN and SYN_ACK each use up one number once the handshake completes,
//!   so no data or FIN packet shares a seq with a handshake ack.

use rand::Rng;

/// Range the initial sequence number is drawn from.
const ISN_RANGE: std::ops::Range<u32> = 1..10_000;

/// A packet that has been sent but not yet acknowledged.  The caller keeps
/// the packet itself and retransmits it verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InFlight {
    pub seq: u32,
    /// How many times this packet has been transmitted (1 = first send).
    pub tx_count: u32,
}

/// Stop-and-wait send-side state for one connection.
#[derive(Debug)]
pub struct Sender {
    /// Sequence number the **next** data packet will carry.
    pub next_seq: u32,
    /// Consecutive timeouts while waiting for the current ack.
    pub retries: u32,
    pub in_flight: Option<InFlight>,
}

impl Sender {
    pub fn new(isn: u32) -> Self {
        Self {
            next_seq: isn,
            retries: 0,
            in_flight: None,
        }
    }

    /// A sender starting from a random initial sequence number.
    pub fn with_random_isn() -> Self {
        Self::new(rand::rng().random_range(ISN_RANGE))
    }

    /// Mark `seq` as in flight (first transmission).
    pub fn record_sent(&mut self, seq: u32) {
        debug_assert!(
            self.in_flight.is_none(),
            "record_sent called while a packet is already in flight"
        );
        self.retries = 0;
        self.in_flight = Some(InFlight { seq, tx_count: 1 });
    }

    /// Count another transmission of the in-flight packet.
    pub fn on_retransmit(&mut self) {
        if let Some(entry) = self.in_flight.as_mut() {
            entry.tx_count += 1;
        }
    }

    /// Count a wait that ended without any reply.  Returns the new total.
    pub fn on_timeout(&mut self) -> u32 {
        self.retries += 1;
        self.retries
    }

    /// The in-flight packet was acknowledged: advance and go idle.
    pub fn on_acked(&mut self) {
        self.in_flight = None;
        self.advance();
    }

    /// Use up the current sequence number without a data packet, as the
    /// SYN and SYN_ACK do.
    pub fn advance(&mut self) {
        self.next_seq = self.next_seq.wrapping_add(1);
        self.retries = 0;
    }

    /// Give up on the in-flight packet without advancing.
    pub fn abandon(&mut self) -> Option<InFlight> {
        self.in_flight.take()
    }

    /// Times the in-flight packet has been sent, or `0` when idle.
    pub fn tx_count(&self) -> u32 {
        self.in_flight.as_ref().map_or(0, |e| e.tx_count)
    }
}
