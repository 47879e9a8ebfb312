//! Helpers shared by the integration tests.
//!
//! Tests run on a [`SimNetwork`] with tokio's clock paused, so every timeout
//! below resolves instantly and deterministically once all tasks are idle.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use reliable_datagram::{
    Connection, ConnectionConfig, PortAllocator, SimNetwork, SimSocket,
};

pub const CLIENT: &str = "10.0.0.1:4000";
pub const SERVER: &str = "10.0.0.5:6000";

/// Upper bound on any single step of a test.
pub const STEP: Duration = Duration::from_secs(30);

pub fn addr(s: &str) -> SocketAddr {
    s.parse().unwrap()
}

pub fn fast_config() -> ConnectionConfig {
    ConnectionConfig::default()
        .with_timeout(Duration::from_millis(50))
        .with_max_send_tries(5)
        .with_max_receive_tries(5)
        .with_time_wait_linger(Duration::from_millis(100))
}

/// A listening connection on [`SERVER`] that takes ports from `ports`.
pub fn listener(net: &SimNetwork, ports: &PortAllocator) -> Connection<SimSocket> {
    Connection::new(net.bind(addr(SERVER)).unwrap(), fast_config()).with_ports(ports.clone())
}

pub fn client(net: &SimNetwork) -> Connection<SimSocket> {
    Connection::new(net.bind(addr(CLIENT)).unwrap(), fast_config())
}

/// Run a clean handshake and return `(client, server)`, both `ESTABLISHED`.
pub async fn establish(net: &SimNetwork) -> (Connection<SimSocket>, Connection<SimSocket>) {
    establish_with_ports(net, &PortAllocator::default()).await
}

pub async fn establish_with_ports(
    net: &SimNetwork,
    ports: &PortAllocator,
) -> (Connection<SimSocket>, Connection<SimSocket>) {
    let mut listener = listener(net, ports);
    let accept = tokio::spawn(async move { listener.accept().await });

    let mut client = client(net);
    tokio::time::timeout(STEP, client.connect(addr(SERVER)))
        .await
        .expect("connect timed out")
        .expect("connect failed");

    let server = tokio::time::timeout(STEP, accept)
        .await
        .expect("accept timed out")
        .expect("accept task panicked")
        .expect("accept failed");
    (client, server)
}
