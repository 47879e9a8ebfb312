//! Pure predicates over received packets.
//!
//! Nothing here touches a socket or mutates connection state.  The
//! connection layer asks one of two questions of every packet it reads:
//! - while **receiving** data: [`classify_inbound`] → [`Inbound`]
//! - while **waiting for an ack**: [`classify_ack`] → [`AckVerdict`]
//!
//! Checks always run in the same order: source endpoint first (ghost), then
//! checksum, then flag, then sequence position.  A packet that fails an
//! earlier check is never judged by a later one.

use std::net::{IpAddr, SocketAddr};

use crate::packet::{Flag, Packet};

/// Returns `true` when sequence number `a` is ≤ `b` in wrap-around space.
///
/// The comparison works as long as the two values are less than
/// `u32::MAX / 2` apart.
#[inline]
pub fn seq_le(a: u32, b: u32) -> bool {
    b.wrapping_sub(a) <= (u32::MAX / 2)
}

/// Strict form of [`seq_le`].
#[inline]
pub fn seq_lt(a: u32, b: u32) -> bool {
    a != b && seq_le(a, b)
}

/// `true` when the packet claims to come from exactly `remote`.
pub fn is_from(packet: &Packet, remote: SocketAddr) -> bool {
    packet.header.src == remote
}

/// `true` when the packet claims to come from host `ip`, on any port.
///
/// Used for SYN_ACK, which arrives from the server's freshly allocated port.
pub fn is_from_host(packet: &Packet, ip: IpAddr) -> bool {
    packet.header.src.ip() == ip
}

pub fn checksum_valid(packet: &Packet) -> bool {
    packet.has_valid_checksum()
}

/// `true` when `packet` is the successor of the last delivered packet, or
/// nothing has been delivered yet.
pub fn is_in_sequence(packet: &Packet, last_delivered: Option<&Packet>) -> bool {
    match last_delivered {
        None => true,
        Some(last) => packet.header.seq == last.header.seq.wrapping_add(1),
    }
}

/// Where an acknowledgment number falls relative to the packet in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckPosition {
    /// Acknowledges an earlier packet.
    Stale,
    /// Acknowledges the packet in flight.
    Exact,
    /// Acknowledges something never sent.
    Ahead,
}

pub fn ack_position(ack: u32, in_flight_seq: u32) -> AckPosition {
    if ack == in_flight_seq {
        AckPosition::Exact
    } else if seq_lt(ack, in_flight_seq) {
        AckPosition::Stale
    } else {
        AckPosition::Ahead
    }
}

/// What `receive()` should do with a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    /// Not from the connected peer; discard silently.
    Ghost,
    /// Checksum mismatch; re-acknowledge the last good packet.
    Corrupt,
    /// Peer is releasing the connection.
    Fin,
    /// Handshake or ack leftovers; discard silently.
    Control(Flag),
    /// Duplicate or out-of-order data; re-acknowledge the last good packet.
    Duplicate,
    /// The next data packet; deliver and acknowledge it.
    InOrder,
}

pub fn classify_inbound(
    packet: &Packet,
    remote: SocketAddr,
    last_delivered: Option<&Packet>,
) -> Inbound {
    if !is_from(packet, remote) {
        return Inbound::Ghost;
    }
    if !checksum_valid(packet) {
        return Inbound::Corrupt;
    }
    match packet.header.flag {
        Flag::Fin => Inbound::Fin,
        Flag::None if is_in_sequence(packet, last_delivered) => Inbound::InOrder,
        Flag::None => Inbound::Duplicate,
        other => Inbound::Control(other),
    }
}

/// What a sender waiting for the ack of `in_flight_seq` should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckVerdict {
    /// Not from the connected peer, or acknowledges something never sent.
    Ghost,
    Corrupt,
    /// Ack of an earlier packet; retransmit.
    Stale,
    /// The packet in flight is acknowledged.
    Acked,
    /// Peer sent FIN instead.
    Fin,
    /// Peer sent data; it may need re-acknowledging.
    PeerData,
    /// Any other control packet.
    Unexpected(Flag),
}

pub fn classify_ack(packet: &Packet, remote: SocketAddr, in_flight_seq: u32) -> AckVerdict {
    if !is_from(packet, remote) {
        return AckVerdict::Ghost;
    }
    if !checksum_valid(packet) {
        return AckVerdict::Corrupt;
    }
    match packet.header.flag {
        Flag::Ack => match ack_position(packet.header.ack, in_flight_seq) {
            AckPosition::Exact => AckVerdict::Acked,
            AckPosition::Stale => AckVerdict::Stale,
            AckPosition::Ahead => AckVerdict::Ghost,
        },
        Flag::Fin => AckVerdict::Fin,
        Flag::None => AckVerdict::PeerData,
        other => AckVerdict::Unexpected(other),
    }
}
