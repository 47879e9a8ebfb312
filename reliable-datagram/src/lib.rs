//! `reliable-datagram`: a connection-oriented, reliable message channel over
//! an unreliable datagram transport.
//!
//! # Architecture
//!
//! ```text
//!        connect / accept      send / receive          close
//!  ┌────────────┐   ┌──────────────┐   ┌────────────┐
//!  │ handshake  │   │   delivery   │   │  teardown  │
//!  └─────┬──────┘   └──────┬───────┘   └─────┬──────┘
//!        └─────────────────┼─────────────────┘
//!  ┌───────────────────────▼─────────────────────────┐
//!  │                  Connection<T>                  │
//!  │  state machine · Sender · Receiver · PortLease  │
//!  └──────┬──────────────────────────────────┬───────┘
//!         │ classify every inbound packet    │ send_once / receive_once
//!  ┌──────▼──────┐                    ┌──────▼──────────────┐
//!  │ classifier  │                    │  Transport (trait)  │
//!  └─────────────┘                    ├──────────┬──────────┤
//!                                     │  socket  │simulator │
//!                                     │  (UDP)   │(in-mem)  │
//!                                     └──────────┴──────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]: wire format and checksum
//! - [`classifier`]: ghost / corrupt / duplicate / in-order verdicts
//! - [`state`]: finite-state-machine types
//! - [`config`]: timeouts and retry budgets
//! - [`ports`]: shared port registry for spawned connections
//! - [`transport`]: the datagram collaborator boundary
//! - [`socket`]: async UDP transport
//! - [`simulator`]: lossy/corrupting/reordering in-memory network for tests
//! - [`sender`]: stop-and-wait outbound state
//! - [`receiver`]: stop-and-wait inbound state
//! - [`connection`]: per-connection state and errors
//! - [`handshake`], [`delivery`], [`teardown`]: the public operations

pub mod classifier;
pub mod config;
pub mod connection;
pub mod delivery;
pub mod handshake;
pub mod packet;
pub mod ports;
pub mod receiver;
pub mod sender;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod teardown;
pub mod transport;

pub use config::ConnectionConfig;
pub use connection::{ConnError, Connection};
pub use packet::{Flag, Packet};
pub use ports::{PortAllocator, PortLease};
pub use simulator::{Fault, SimNetwork, SimSocket, SimulatorConfig};
pub use socket::UdpTransport;
pub use state::ConnectionState;
pub use transport::{Transport, TransportError};
