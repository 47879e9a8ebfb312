//! UDP implementation of [`Transport`].
//!
//! [`UdpTransport`] is a thin wrapper around `tokio::net::UdpSocket` that
//! speaks [`Packet`] instead of raw bytes.  All protocol logic lives
//! elsewhere; this module owns only byte I/O.
//!
//! Bind to a concrete IP (e.g. `127.0.0.1:0`), not a wildcard: the bound
//! address is stamped into every outgoing header and the peer checks it.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;

use crate::packet::{Flag, Packet, MAX_DATAGRAM};
use crate::transport::{Transport, TransportError};

/// Returns true for ICMP-driven errors some platforms surface on UDP reads.
/// They say nothing about the next datagram, so the read is retried.
fn is_spurious_io_error(e: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    matches!(
        e.kind(),
        ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset | ErrorKind::Interrupted
    )
}

/// An async, packet-oriented UDP socket.
#[derive(Debug)]
pub struct UdpTransport {
    /// Address this socket is bound to (filled in after OS assigns ephemeral port).
    local_addr: SocketAddr,
    inner: UdpSocket,
}

impl UdpTransport {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing port `0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self, TransportError> {
        if local_addr.ip().is_unspecified() {
            log::warn!("[udp] binding wildcard {local_addr}; peers will see it as the source address");
        }
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        log::debug!("[udp] bound {local_addr}");
        Ok(Self { local_addr, inner })
    }

    /// Read datagrams until one decodes.  Undecodable datagrams are dropped.
    async fn recv_packet(&self) -> Result<Packet, TransportError> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let (n, from) = match self.inner.recv_from(&mut buf).await {
                Ok(v) => v,
                Err(e) if is_spurious_io_error(&e) => continue,
                Err(e) => return Err(e.into()),
            };
            match Packet::decode(&buf[..n]) {
                Ok(packet) => return Ok(packet),
                Err(e) => log::debug!("[udp] dropping {n}-byte datagram from {from}: {e}"),
            }
        }
    }
}

impl Transport for UdpTransport {
    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn send_once(&self, packet: &Packet) -> Result<(), TransportError> {
        let bytes = packet.encode();
        self.inner.send_to(&bytes, packet.header.dst).await?;
        Ok(())
    }

    async fn receive_once(
        &self,
        block_until_match: bool,
        timeout: Duration,
    ) -> Result<Option<Packet>, TransportError> {
        if block_until_match {
            loop {
                let packet = self.recv_packet().await?;
                if packet.header.flag == Flag::Syn {
                    return Ok(Some(packet));
                }
                log::debug!(
                    "[udp] listening; ignoring {} from {}",
                    packet.header.flag,
                    packet.header.src
                );
            }
        }

        match tokio::time::timeout(timeout, self.recv_packet()).await {
            Ok(result) => result.map(Some),
            Err(_elapsed) => Ok(None),
        }
    }

    async fn bind_port(&self, port: u16) -> Result<Self, TransportError> {
        Self::bind(SocketAddr::new(self.local_addr.ip(), port)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn loopback() -> UdpTransport {
        UdpTransport::bind("127.0.0.1:0".parse().unwrap())
            .await
            .expect("bind loopback")
    }

    #[tokio::test]
    async fn packet_crosses_loopback_intact() {
        let a = loopback().await;
        let b = loopback().await;
        let pkt = Packet::new(a.local_addr(), b.local_addr(), Flag::None, 5, 0, b"hi".to_vec());

        a.send_once(&pkt).await.unwrap();
        let got = b
            .receive_once(false, Duration::from_secs(2))
            .await
            .unwrap()
            .expect("datagram should arrive");
        assert_eq!(got, pkt);
    }

    #[tokio::test]
    async fn receive_times_out_with_none() {
        let a = loopback().await;
        let got = a.receive_once(false, Duration::from_millis(20)).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn garbage_datagrams_are_skipped() {
        let a = loopback().await;
        let raw = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        raw.send_to(b"not a packet", a.local_addr()).await.unwrap();

        let got = a.receive_once(false, Duration::from_millis(100)).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn listening_mode_waits_for_syn() {
        let server = loopback().await;
        let client = loopback().await;
        let dst = server.local_addr();
        let src = client.local_addr();

        client
            .send_once(&Packet::new(src, dst, Flag::None, 1, 0, b"early".to_vec()))
            .await
            .unwrap();
        client
            .send_once(&Packet::new(src, dst, Flag::Syn, 2, 0, vec![]))
            .await
            .unwrap();

        let got = tokio::time::timeout(
            Duration::from_secs(2),
            server.receive_once(true, Duration::ZERO),
        )
        .await
        .expect("SYN should arrive")
        .unwrap()
        .unwrap();
        assert_eq!(got.header.flag, Flag::Syn);
        assert_eq!(got.header.seq, 2);
    }

    #[tokio::test]
    async fn bind_port_keeps_host() {
        let a = loopback().await;
        let scratch = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let free = scratch.local_addr().unwrap().port();
        drop(scratch);

        let b = a.bind_port(free).await.unwrap();
        assert_eq!(b.local_addr().ip(), a.local_addr().ip());
        assert_eq!(b.local_addr().port(), free);
    }
}
