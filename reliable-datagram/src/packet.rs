//! Wire-format definitions for protocol packets.
//!
//! Every datagram exchanged between peers is a [`Packet`].  This module is
//! responsible for:
//! - Defining the on-wire binary layout (endpoints, flag, counters, payload).
//! - Stamping and recomputing the checksum.
//! - Serialising a [`Packet`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Packet`], returning errors
//!   for malformed or truncated input.
//!
//! No I/O happens here; this is pure data transformation.
//!
//! Decoding does **not** verify the checksum.  A corrupted packet still parses
//! and carries the checksum it arrived with, so the connection layer can tell
//! corruption apart from loss (see [`crate::classifier`]).
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.  IPv4 addresses are stored as
//! IPv4-mapped IPv6 addresses so the header has a fixed size.
//!
//! ```text
//!  offset  size  field
//!  ------  ----  ---------------------
//!       0    16  source address
//!      16     2  source port
//!      18    16  destination address
//!      34     2  destination port
//!      36     1  flag
//!      37     4  sequence number
//!      41     4  acknowledgment number
//!      45     2  payload length
//!      47     2  checksum
//!      49   ...  payload
//! ```

use std::net::{IpAddr, Ipv6Addr, SocketAddr};

use thiserror::Error;

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 49;

/// Largest UDP payload an IPv4 datagram can carry.
pub const MAX_DATAGRAM: usize = 65_507;

/// Largest payload a single packet can carry so header and payload still
/// fit in one datagram.
pub const MAX_PAYLOAD: usize = MAX_DATAGRAM - HEADER_LEN;

// Byte offsets of each field within the serialised header.
const OFF_SRC_ADDR: usize = 0;
const OFF_SRC_PORT: usize = 16;
const OFF_DST_ADDR: usize = 18;
const OFF_DST_PORT: usize = 34;
const OFF_FLAG: usize = 36;
const OFF_SEQ: usize = 37;
const OFF_ACK: usize = 41;
const OFF_PAYLOAD_LEN: usize = 45;
const OFF_CHECKSUM: usize = 47;

/// Control flag carried by every packet.  Exactly one is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    /// Plain data packet.
    None,
    /// Connection initiation.
    Syn,
    /// Reply to a SYN.
    SynAck,
    /// Acknowledgment of the packet named in the acknowledgment field.
    Ack,
    /// Sender has nothing more to send.
    Fin,
}

impl Flag {
    fn to_wire(self) -> u8 {
        match self {
            Flag::None => 0,
            Flag::Syn => 1,
            Flag::SynAck => 2,
            Flag::Ack => 3,
            Flag::Fin => 4,
        }
    }

    fn from_wire(byte: u8) -> Result<Self, PacketError> {
        Ok(match byte {
            0 => Flag::None,
            1 => Flag::Syn,
            2 => Flag::SynAck,
            3 => Flag::Ack,
            4 => Flag::Fin,
            other => return Err(PacketError::UnknownFlag(other)),
        })
    }
}

impl std::fmt::Display for Flag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Flag::None => "DATA",
            Flag::Syn => "SYN",
            Flag::SynAck => "SYN_ACK",
            Flag::Ack => "ACK",
            Flag::Fin => "FIN",
        };
        f.write_str(name)
    }
}

/// Fixed-size protocol header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Endpoint that claims to have sent this packet.
    pub src: SocketAddr,
    /// Endpoint this packet is addressed to.
    pub dst: SocketAddr,
    pub flag: Flag,
    /// Sequence number of this packet.
    pub seq: u32,
    /// Sequence number of the packet being acknowledged (ACK / SYN_ACK).
    pub ack: u32,
    /// Internet checksum (RFC 1071) over the serialised packet with this
    /// field zeroed.
    ///
    /// Stamped by [`Packet::new`]; left as received by [`Packet::decode`].
    pub checksum: u16,
}

/// A complete protocol datagram: header + payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Build a packet and stamp its checksum.
    pub fn new(
        src: SocketAddr,
        dst: SocketAddr,
        flag: Flag,
        seq: u32,
        ack: u32,
        payload: Vec<u8>,
    ) -> Self {
        let mut packet = Packet {
            header: Header {
                src,
                dst,
                flag,
                seq,
                ack,
                checksum: 0,
            },
            payload,
        };
        packet.stamp();
        packet
    }

    /// Recompute and store the checksum.
    pub fn stamp(&mut self) {
        self.header.checksum = self.compute_checksum();
    }

    /// Checksum of the packet's current contents, ignoring the stored value.
    pub fn compute_checksum(&self) -> u16 {
        let mut buf = self.encode();
        buf[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&0u16.to_be_bytes());
        internet_checksum(&buf)
    }

    /// `true` when the stored checksum matches the packet's contents.
    pub fn has_valid_checksum(&self) -> bool {
        self.compute_checksum() == self.header.checksum
    }

    /// Serialise this packet into a newly allocated byte vector.
    ///
    /// The stored checksum is written as-is.  Payloads longer than
    /// [`MAX_PAYLOAD`] are truncated on the wire; callers enforce the limit.
    pub fn encode(&self) -> Vec<u8> {
        let payload_len = self.payload.len().min(MAX_PAYLOAD);
        let mut buf = vec![0u8; HEADER_LEN + payload_len];

        buf[OFF_SRC_ADDR..OFF_SRC_ADDR + 16].copy_from_slice(&mapped(self.header.src.ip()).octets());
        buf[OFF_SRC_PORT..OFF_SRC_PORT + 2].copy_from_slice(&self.header.src.port().to_be_bytes());
        buf[OFF_DST_ADDR..OFF_DST_ADDR + 16].copy_from_slice(&mapped(self.header.dst.ip()).octets());
        buf[OFF_DST_PORT..OFF_DST_PORT + 2].copy_from_slice(&self.header.dst.port().to_be_bytes());
        buf[OFF_FLAG] = self.header.flag.to_wire();
        buf[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&self.header.seq.to_be_bytes());
        buf[OFF_ACK..OFF_ACK + 4].copy_from_slice(&self.header.ack.to_be_bytes());
        buf[OFF_PAYLOAD_LEN..OFF_PAYLOAD_LEN + 2]
            .copy_from_slice(&(payload_len as u16).to_be_bytes());
        buf[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&self.header.checksum.to_be_bytes());

        buf[HEADER_LEN..].copy_from_slice(&self.payload[..payload_len]);
        buf
    }

    /// Parse a [`Packet`] from a raw byte slice.
    ///
    /// Returns [`Err`] if:
    /// - `buf` is shorter than [`HEADER_LEN`],
    /// - the `payload_len` field disagrees with `buf.len()`, or
    /// - the flag byte is not a known [`Flag`].
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < HEADER_LEN {
            return Err(PacketError::BufferTooShort);
        }

        let payload_len = usize::from(read_u16(buf, OFF_PAYLOAD_LEN));
        if buf.len() != HEADER_LEN + payload_len {
            return Err(PacketError::LengthMismatch);
        }

        let src = SocketAddr::new(read_addr(buf, OFF_SRC_ADDR), read_u16(buf, OFF_SRC_PORT));
        let dst = SocketAddr::new(read_addr(buf, OFF_DST_ADDR), read_u16(buf, OFF_DST_PORT));

        Ok(Packet {
            header: Header {
                src,
                dst,
                flag: Flag::from_wire(buf[OFF_FLAG])?,
                seq: read_u32(buf, OFF_SEQ),
                ack: read_u32(buf, OFF_ACK),
                checksum: read_u16(buf, OFF_CHECKSUM),
            },
            payload: buf[HEADER_LEN..].to_vec(),
        })
    }
}

/// Errors that can arise when parsing a raw datagram.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("buffer too short to contain a header")]
    BufferTooShort,
    #[error("payload_len field does not match remaining bytes")]
    LengthMismatch,
    #[error("unknown flag byte {0:#04x}")]
    UnknownFlag(u8),
}

fn mapped(ip: IpAddr) -> Ipv6Addr {
    match ip {
        IpAddr::V4(v4) => v4.to_ipv6_mapped(),
        IpAddr::V6(v6) => v6,
    }
}

fn read_addr(buf: &[u8], off: usize) -> IpAddr {
    let mut octets = [0u8; 16];
    octets.copy_from_slice(&buf[off..off + 16]);
    let v6 = Ipv6Addr::from(octets);
    match v6.to_ipv4_mapped() {
        Some(v4) => IpAddr::V4(v4),
        None => IpAddr::V6(v6),
    }
}

fn read_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_be_bytes([buf[off], buf[off + 1]])
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

/// Compute the Internet checksum (RFC 1071) over `data`.
///
/// Sum consecutive 16-bit big-endian words, fold the carry, return the
/// one's-complement.  The caller must zero any checksum field within `data`
/// before calling this function.
fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);

    for word in &mut chunks {
        sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
    }
    // Odd trailing byte: pad with a zero byte on the right.
    if let [last] = chunks.remainder() {
        sum += u32::from(*last) << 8;
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }

    !(sum as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    fn make_packet(flag: Flag, seq: u32, ack: u32, payload: &[u8]) -> Packet {
        Packet::new(
            addr("10.0.0.1:4000"),
            addr("10.0.0.5:6000"),
            flag,
            seq,
            ack,
            payload.to_vec(),
        )
    }

    #[test]
    fn encode_decode_roundtrip() {
        let pkt = make_packet(Flag::None, 42, 0, b"hello");
        let decoded = Packet::decode(&pkt.encode()).unwrap();
        assert_eq!(decoded, pkt);
        assert!(decoded.has_valid_checksum());
    }

    #[test]
    fn ipv6_endpoints_survive_the_wire() {
        let pkt = Packet::new(
            addr("[2001:db8::1]:7000"),
            addr("[::1]:7001"),
            Flag::Syn,
            1,
            0,
            vec![],
        );
        let decoded = Packet::decode(&pkt.encode()).unwrap();
        assert_eq!(decoded.header.src, pkt.header.src);
        assert_eq!(decoded.header.dst, pkt.header.dst);
    }

    #[test]
    fn ipv4_is_not_reported_as_mapped_ipv6() {
        let decoded = Packet::decode(&make_packet(Flag::Ack, 0, 0, b"").encode()).unwrap();
        assert!(decoded.header.src.is_ipv4());
    }

    #[test]
    fn decode_short_header_returns_error() {
        assert_eq!(Packet::decode(&[]), Err(PacketError::BufferTooShort));
        assert_eq!(
            Packet::decode(&[0u8; HEADER_LEN - 1]),
            Err(PacketError::BufferTooShort)
        );
    }

    #[test]
    fn decode_truncated_payload_returns_error() {
        let mut bytes = make_packet(Flag::None, 0, 0, b"data").encode();
        bytes.pop(); // payload_len still claims 4 bytes, but buf is one short
        assert_eq!(Packet::decode(&bytes), Err(PacketError::LengthMismatch));
    }

    #[test]
    fn decode_unknown_flag_returns_error() {
        let mut bytes = make_packet(Flag::Fin, 0, 0, b"").encode();
        bytes[OFF_FLAG] = 0x7f;
        assert_eq!(Packet::decode(&bytes), Err(PacketError::UnknownFlag(0x7f)));
    }

    #[test]
    fn corrupt_byte_still_decodes_but_fails_checksum() {
        let mut bytes = make_packet(Flag::None, 99, 0, b"test").encode();
        bytes[HEADER_LEN] ^= 0xff;
        let decoded = Packet::decode(&bytes).unwrap();
        assert!(!decoded.has_valid_checksum());
    }

    #[test]
    fn stamp_repairs_a_modified_packet() {
        let mut pkt = make_packet(Flag::None, 7, 0, b"abc");
        pkt.header.seq = 8;
        assert!(!pkt.has_valid_checksum());
        pkt.stamp();
        assert!(pkt.has_valid_checksum());
    }

    #[test]
    fn header_len_constant_is_correct() {
        // addr(16) + port(2) twice + flag(1) + seq(4) + ack(4) + len(2) + checksum(2)
        assert_eq!(HEADER_LEN, 2 * (16 + 2) + 1 + 4 + 4 + 2 + 2);
    }

    #[test]
    fn largest_packet_fits_one_udp_datagram() {
        let pkt = make_packet(Flag::None, 1, 0, &vec![0xab; MAX_PAYLOAD]);
        assert_eq!(pkt.encode().len(), MAX_DATAGRAM);
        assert_eq!(Packet::decode(&pkt.encode()).unwrap().payload.len(), MAX_PAYLOAD);
    }

    #[test]
    fn seq_ack_big_endian_on_wire() {
        let bytes = make_packet(Flag::Ack, 0x0102_0304, 0x0506_0708, b"").encode();
        assert_eq!(&bytes[OFF_SEQ..OFF_SEQ + 4], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&bytes[OFF_ACK..OFF_ACK + 4], &[0x05, 0x06, 0x07, 0x08]);
    }

    #[test]
    fn odd_length_checksum_pads_right() {
        // 0x0102 + 0x0300 = 0x0402 -> !0x0402
        assert_eq!(internet_checksum(&[0x01, 0x02, 0x03]), !0x0402);
    }
}
