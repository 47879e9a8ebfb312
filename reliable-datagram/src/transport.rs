//! The unreliable datagram primitive the connection layer runs on.
//!
//! A [`Transport`] moves single [`Packet`]s with no delivery guarantee: a
//! packet may be lost, duplicated, corrupted or reordered.  Two
//! implementations ship with the crate:
//! - [`crate::socket::UdpTransport`]: real UDP over `tokio`.
//! - [`crate::simulator::SimSocket`]: in-memory network with fault injection.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::packet::{Packet, PacketError};

/// Local failures of the datagram layer.
///
/// Loss is never an error: it shows up as a wait that returns `None`.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("packet decode error: {0}")]
    Packet(#[from] PacketError),
    #[error("address {0} is already bound")]
    AddrInUse(SocketAddr),
    #[error("simulated network has shut down")]
    NetworkDown,
}

impl TransportError {
    /// `true` when binding failed only because the port is taken.
    pub fn is_addr_in_use(&self) -> bool {
        match self {
            TransportError::AddrInUse(_) => true,
            TransportError::Io(e) => e.kind() == std::io::ErrorKind::AddrInUse,
            _ => false,
        }
    }
}

/// Best-effort, packet-oriented datagram endpoint bound to one local address.
pub trait Transport: Sized + Send + Sync + 'static {
    /// Address this endpoint is bound to.  Used as the source of every
    /// packet the connection builds.
    fn local_addr(&self) -> SocketAddr;

    /// Transmit `packet` once to `packet.header.dst`.  No delivery guarantee.
    fn send_once(&self, packet: &Packet) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Wait for one inbound packet.
    ///
    /// With `block_until_match == false`, returns `Ok(None)` once `timeout`
    /// elapses without a packet.  With `block_until_match == true` the
    /// timeout is ignored and the call waits as long as it takes for a SYN,
    /// discarding everything else; this is the LISTEN mode.
    fn receive_once(
        &self,
        block_until_match: bool,
        timeout: Duration,
    ) -> impl Future<Output = Result<Option<Packet>, TransportError>> + Send;

    /// Bind a sibling endpoint on the same host at `port`.
    ///
    /// `accept()` uses this to move a new connection off the listening port.
    fn bind_port(&self, port: u16) -> impl Future<Output = Result<Self, TransportError>> + Send;
}
