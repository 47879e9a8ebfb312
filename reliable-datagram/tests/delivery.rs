//! Integration tests for stop-and-wait send/receive.
//!
//! Faults are scripted on the simulator so each test pins down one recovery
//! path: a lost data packet, a lost ack, corruption, duplication and
//! reordering.

mod common;

use std::time::Duration;

use common::{addr, establish, fast_config, CLIENT, STEP};
use reliable_datagram::packet::MAX_PAYLOAD;
use reliable_datagram::{
    ConnError, Connection, ConnectionState, Fault, Flag, Packet, SimNetwork, SimSocket, Transport,
    UdpTransport,
};

/// Send `messages` in order while the server receives them in a background
/// task.  The server keeps receiving until the last one arrives, so it is
/// there to re-acknowledge any retransmission.
async fn deliver_all(
    client: &mut Connection<SimSocket>,
    mut server: Connection<SimSocket>,
    messages: &[&[u8]],
) -> Connection<SimSocket> {
    let expected: Vec<Vec<u8>> = messages.iter().map(|m| m.to_vec()).collect();
    let count = messages.len();
    let rx = tokio::spawn(async move {
        let mut got = Vec::new();
        for _ in 0..count {
            got.push(server.receive().await.expect("receive failed"));
        }
        (server, got)
    });

    for message in messages {
        tokio::time::timeout(STEP, client.send(message))
            .await
            .expect("send timed out")
            .expect("send failed");
    }
    let (server, got) = tokio::time::timeout(STEP, rx).await.unwrap().unwrap();
    assert_eq!(got, expected);
    server
}

async fn exchange(
    client: &mut Connection<SimSocket>,
    server: Connection<SimSocket>,
    message: &[u8],
) -> Connection<SimSocket> {
    deliver_all(client, server, &[message]).await
}

fn is_data(p: &Packet) -> bool {
    p.header.flag == Flag::None
}

#[tokio::test(start_paused = true)]
async fn hello_is_delivered_and_sequence_advances_by_one() {
    let net = SimNetwork::default();
    let (mut client, server) = establish(&net).await;
    let before = client.next_sequence_number();

    let server = exchange(&mut client, server, b"hello").await;

    assert_eq!(client.next_sequence_number(), before.wrapping_add(1));
    assert_eq!(client.send_retry_count(), 0);
    assert_eq!(server.last_delivered().map(|p| p.header.seq), Some(before));
}

#[tokio::test(start_paused = true)]
async fn messages_flow_both_ways_in_order() {
    let net = SimNetwork::default();
    let (mut client, mut server) = establish(&net).await;

    for i in 0..5u8 {
        server = exchange(&mut client, server, &[b'c', i]).await;

        // And back the other way.
        let echo = tokio::spawn(async move {
            server.send(&[b's', i]).await.unwrap();
            server
        });
        assert_eq!(client.receive().await.unwrap(), vec![b's', i]);
        server = echo.await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn lost_data_packet_is_retransmitted_and_delivered_once() {
    let net = SimNetwork::default();
    let (mut client, server) = establish(&net).await;
    net.inject(Fault::Drop, is_data);

    // A redelivered "first" would show up in place of "second".
    deliver_all(&mut client, server, &[b"first", b"second"]).await;
    assert_eq!(net.stats().dropped, 1);
}

#[tokio::test(start_paused = true)]
async fn lost_ack_does_not_duplicate_delivery() {
    let net = SimNetwork::default();
    let (mut client, server) = establish(&net).await;
    let server_addr = server.local_addr();
    net.inject(Fault::Drop, move |p| {
        p.header.flag == Flag::Ack && p.header.src == server_addr
    });

    let first_seq = client.next_sequence_number();

    // "one" is retransmitted after its ack is lost; the server re-acks the
    // copy while waiting for "two" instead of delivering it again.
    let server = deliver_all(&mut client, server, &[b"one", b"two"]).await;
    assert_eq!(net.stats().dropped, 1);
    assert_eq!(
        server.last_delivered().map(|p| p.header.seq),
        Some(first_seq.wrapping_add(1))
    );
}

/// A stray copy of the client's final handshake ACK is still queued when
/// the server sends for the first time.  It must not pass for the ack of
/// that data, which is lost and has to be retransmitted.
#[tokio::test(start_paused = true)]
async fn duplicated_handshake_ack_does_not_ack_first_data() {
    let net = SimNetwork::default();
    net.inject(Fault::Duplicate, |p| {
        p.header.flag == Flag::Ack && p.header.src == addr(CLIENT)
    });
    let (mut client, mut server) = establish(&net).await;
    assert_eq!(net.stats().duplicated, 1);
    net.inject(Fault::Drop, is_data);

    let first = server.next_sequence_number();
    let sending = tokio::spawn(async move {
        let result = server.send(b"server-first").await;
        (server, result)
    });
    let got = tokio::time::timeout(STEP, client.receive())
        .await
        .expect("receive timed out")
        .expect("receive failed");
    assert_eq!(got, b"server-first");

    let (server, result) = tokio::time::timeout(STEP, sending).await.unwrap().unwrap();
    result.unwrap();
    assert_eq!(net.stats().dropped, 1);
    assert_eq!(server.next_sequence_number(), first.wrapping_add(1));
    assert_eq!(client.last_delivered().map(|p| p.header.seq), Some(first));
}

#[tokio::test(start_paused = true)]
async fn corrupted_packet_is_never_delivered() {
    let net = SimNetwork::default();
    let (mut client, server) = establish(&net).await;
    net.inject(Fault::Corrupt, is_data);

    let server = exchange(&mut client, server, b"intact").await;
    assert_eq!(net.stats().corrupted, 1);
    assert_eq!(server.last_delivered().map(|p| p.payload.clone()), Some(b"intact".to_vec()));
}

#[tokio::test(start_paused = true)]
async fn corrupted_ack_triggers_retransmission() {
    let net = SimNetwork::default();
    let (mut client, server) = establish(&net).await;
    let server_addr = server.local_addr();
    net.inject(Fault::Corrupt, move |p| {
        p.header.flag == Flag::Ack && p.header.src == server_addr
    });

    deliver_all(&mut client, server, &[b"payload", b"next"]).await;
    assert_eq!(net.stats().corrupted, 1);
}

#[tokio::test(start_paused = true)]
async fn duplicate_is_discarded_and_last_delivered_is_unchanged() {
    let net = SimNetwork::default();
    let (mut client, server) = establish(&net).await;
    net.inject(Fault::Duplicate, is_data);

    let server = exchange(&mut client, server, b"once").await;
    let first = server.last_delivered().cloned();

    // The second copy is still queued; receive() must skip it.
    let server = exchange(&mut client, server, b"twice").await;
    let last = server.last_delivered().unwrap();
    assert_eq!(last.payload, b"twice");
    assert_eq!(Some(last.header.seq), first.map(|p| p.header.seq.wrapping_add(1)));
    assert_eq!(net.stats().duplicated, 1);
}

#[tokio::test(start_paused = true)]
async fn reordered_copy_is_delivered_once() {
    let net = SimNetwork::default();
    let (mut client, server) = establish(&net).await;
    // Held back until the retransmission overtakes it.
    net.inject(Fault::Reorder, is_data);

    deliver_all(&mut client, server, &[b"late", b"on time"]).await;
    assert_eq!(net.stats().reordered, 1);
}

#[tokio::test(start_paused = true)]
async fn ghost_data_is_ignored() {
    let net = SimNetwork::default();
    let (mut client, server) = establish(&net).await;

    let ghost = net.bind(addr("10.0.0.99:4000")).unwrap();
    let forged = Packet::new(
        ghost.local_addr(),
        server.local_addr(),
        Flag::None,
        client.next_sequence_number(),
        0,
        b"forged".to_vec(),
    );
    ghost.send_once(&forged).await.unwrap();

    let server = exchange(&mut client, server, b"real").await;
    assert_eq!(server.receive_retry_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn send_to_silent_peer_loses_the_connection() {
    let net = SimNetwork::default();
    let (mut client, server) = establish(&net).await;
    drop(server);

    let err = client.send(b"anyone?").await.unwrap_err();
    assert!(matches!(err, ConnError::ConnectionLost), "got {err:?}");
    assert_eq!(client.state(), ConnectionState::Closed);

    let again = client.send(b"still there?").await.unwrap_err();
    assert!(matches!(again, ConnError::NotConnected));
    // One data packet, transmitted once per attempt.
    assert_eq!(net.stats().sent, 3 + u64::from(fast_config().max_send_tries));
}

#[tokio::test(start_paused = true)]
async fn receive_from_silent_peer_loses_the_connection() {
    let net = SimNetwork::default();
    let (_client, mut server) = establish(&net).await;

    let err = server.receive().await.unwrap_err();
    assert!(matches!(err, ConnError::ConnectionLost), "got {err:?}");
    assert_eq!(server.state(), ConnectionState::Closed);
    assert_eq!(server.receive_retry_count(), fast_config().max_receive_tries);
    // Reaching CLOSED gives the port back.
    assert_eq!(server.leased_port(), None);
}

#[tokio::test(start_paused = true)]
async fn operations_before_connect_fail() {
    let net = SimNetwork::default();
    let mut conn = Connection::new(net.bind(addr("10.0.0.1:4000")).unwrap(), fast_config());

    assert!(matches!(conn.send(b"x").await, Err(ConnError::NotConnected)));
    assert!(matches!(conn.receive().await, Err(ConnError::NotConnected)));
    assert_eq!(conn.state(), ConnectionState::Closed);
}

#[tokio::test(start_paused = true)]
async fn oversized_message_is_rejected() {
    let net = SimNetwork::default();
    let (mut client, _server) = establish(&net).await;
    let before = client.next_sequence_number();

    let err = client.send(&vec![0u8; MAX_PAYLOAD + 1]).await.unwrap_err();
    assert!(matches!(err, ConnError::MessageTooLarge(n) if n == MAX_PAYLOAD + 1));
    assert_eq!(client.state(), ConnectionState::Established);
    assert_eq!(client.next_sequence_number(), before);
    assert_eq!(net.stats().sent, 3); // SYN, SYN_ACK, ACK
}

#[tokio::test]
async fn udp_loopback_echo() {
    let config = fast_config().with_timeout(Duration::from_millis(500));
    let server_sock = UdpTransport::bind(addr("127.0.0.1:0")).await.unwrap();
    let server_addr = server_sock.local_addr();
    let ports = reliable_datagram::PortAllocator::new(20_000..=60_000);
    let mut listener = Connection::new(server_sock, config.clone()).with_ports(ports);

    let server = tokio::spawn(async move {
        let mut conn = listener.accept().await.unwrap();
        let msg = conn.receive().await.unwrap();
        conn.send(&msg).await.unwrap();
        conn
    });

    let mut client = Connection::new(
        UdpTransport::bind(addr("127.0.0.1:0")).await.unwrap(),
        config,
    );
    client.connect(server_addr).await.unwrap();
    client.send(b"ping").await.unwrap();
    assert_eq!(client.receive().await.unwrap(), b"ping");

    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap();
}

/// The largest accepted message crosses real UDP in one datagram; one byte
/// more is refused up front and the connection stays usable.
#[tokio::test]
async fn udp_loopback_largest_message() {
    let config = fast_config().with_timeout(Duration::from_millis(500));
    let server_sock = UdpTransport::bind(addr("127.0.0.1:0")).await.unwrap();
    let server_addr = server_sock.local_addr();
    let ports = reliable_datagram::PortAllocator::new(20_000..=60_000);
    let mut listener = Connection::new(server_sock, config.clone()).with_ports(ports);

    let server = tokio::spawn(async move {
        let mut conn = listener.accept().await.unwrap();
        let msg = conn.receive().await.unwrap();
        conn.send(&msg[..16]).await.unwrap();
        (conn, msg.len())
    });

    let mut client = Connection::new(
        UdpTransport::bind(addr("127.0.0.1:0")).await.unwrap(),
        config,
    );
    client.connect(server_addr).await.unwrap();
    client.send(&vec![7u8; MAX_PAYLOAD]).await.unwrap();

    let err = client.send(&vec![7u8; MAX_PAYLOAD + 1]).await.unwrap_err();
    assert!(matches!(err, ConnError::MessageTooLarge(n) if n == MAX_PAYLOAD + 1));
    assert_eq!(client.state(), ConnectionState::Established);
    assert_eq!(client.receive().await.unwrap(), vec![7u8; 16]);

    let (_server, received) = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, MAX_PAYLOAD);
}
