//! In-memory adversarial network for deterministic testing.
//!
//! Real networks drop, reorder, duplicate and corrupt packets.  To exercise
//! the reliability mechanisms without depending on actual network conditions,
//! this module provides a [`SimNetwork`] that hosts any number of
//! [`SimSocket`] endpoints and applies a configurable fault model to every
//! packet in flight:
//!
//! | Fault            | Description                                       |
//! |------------------|---------------------------------------------------|
//! | Packet loss      | Drop a packet with probability `loss_rate`.       |
//! | Corruption       | Flip bits without re-stamping the checksum.       |
//! | Duplication      | Deliver a packet twice.                           |
//! | Reordering       | Hold a packet back until the next one to the same |
//! |                  | destination has overtaken it.                     |
//!
//! Random faults come from a `StdRng` seeded by [`SimulatorConfig::seed`], so
//! a failing run can be replayed.  Tests that need an exact scenario use
//! [`SimNetwork::inject`] instead: a scripted fault hits the first packet
//! matching a predicate, exactly once, and takes precedence over the random
//! model.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;

use crate::packet::{Flag, Packet};
use crate::transport::{Transport, TransportError};

/// First port handed out when binding port `0`.
const EPHEMERAL_BASE: u16 = 49152;

/// Configuration for the random fault model.
///
/// All probabilities are in the range `[0.0, 1.0]`; values outside it are
/// clamped.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Probability that any given packet is silently dropped.
    pub loss_rate: f64,
    /// Probability that a packet arrives with flipped bits.
    pub corrupt_rate: f64,
    /// Probability that a packet is delivered twice.
    pub duplicate_rate: f64,
    /// Probability that a packet is overtaken by the next one.
    pub reorder_rate: f64,
    /// RNG seed for the random faults.
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // No faults by default; the simulator is a transparent pass-through.
        Self {
            loss_rate: 0.0,
            corrupt_rate: 0.0,
            duplicate_rate: 0.0,
            reorder_rate: 0.0,
            seed: 0,
        }
    }
}

/// One fault applied to one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Drop,
    Corrupt,
    Duplicate,
    /// Hold back until the next packet to the same destination is delivered.
    Reorder,
}

/// Running totals over the lifetime of a [`SimNetwork`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimStats {
    pub sent: u64,
    pub dropped: u64,
    pub corrupted: u64,
    pub duplicated: u64,
    pub reordered: u64,
    pub delivered: u64,
}

type Matcher = Box<dyn Fn(&Packet) -> bool + Send>;

struct Scripted {
    fault: Fault,
    matches: Matcher,
}

struct Fabric {
    config: SimulatorConfig,
    rng: StdRng,
    endpoints: HashMap<SocketAddr, mpsc::UnboundedSender<Packet>>,
    scripted: VecDeque<Scripted>,
    held: HashMap<SocketAddr, Vec<Packet>>,
    stats: SimStats,
}

/// A shared in-memory network.  Clones refer to the same network.
#[derive(Clone)]
pub struct SimNetwork {
    fabric: Arc<Mutex<Fabric>>,
}

impl Default for SimNetwork {
    fn default() -> Self {
        Self::new(SimulatorConfig::default())
    }
}

impl SimNetwork {
    pub fn new(config: SimulatorConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            fabric: Arc::new(Mutex::new(Fabric {
                config,
                rng,
                endpoints: HashMap::new(),
                scripted: VecDeque::new(),
                held: HashMap::new(),
                stats: SimStats::default(),
            })),
        }
    }

    /// Attach a new endpoint at `addr`.  Port `0` picks a free ephemeral port.
    pub fn bind(&self, addr: SocketAddr) -> Result<SimSocket, TransportError> {
        let mut fabric = self.lock();

        let addr = if addr.port() == 0 {
            let port = (EPHEMERAL_BASE..=u16::MAX)
                .find(|&p| !fabric.endpoints.contains_key(&SocketAddr::new(addr.ip(), p)))
                .ok_or(TransportError::AddrInUse(addr))?;
            SocketAddr::new(addr.ip(), port)
        } else {
            addr
        };
        if fabric.endpoints.contains_key(&addr) {
            return Err(TransportError::AddrInUse(addr));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        fabric.endpoints.insert(addr, tx);
        log::debug!("[sim] bound {addr}");

        Ok(SimSocket {
            local_addr: addr,
            network: self.clone(),
            inbox: tokio::sync::Mutex::new(rx),
        })
    }

    /// Apply `fault` to the first future packet for which `matches` is true.
    ///
    /// Scripted faults queue in injection order; each fires once.
    pub fn inject<F>(&self, fault: Fault, matches: F)
    where
        F: Fn(&Packet) -> bool + Send + 'static,
    {
        self.lock().scripted.push_back(Scripted {
            fault,
            matches: Box::new(matches),
        });
    }

    /// Replace the random fault model, reseeding its RNG.  Scripted faults
    /// and traffic already held back are kept.
    pub fn set_config(&self, config: SimulatorConfig) {
        let mut fabric = self.lock();
        fabric.rng = StdRng::seed_from_u64(config.seed);
        fabric.config = config;
    }

    /// Scripted faults that have not fired yet.
    pub fn pending_faults(&self) -> usize {
        self.lock().scripted.len()
    }

    pub fn stats(&self) -> SimStats {
        self.lock().stats
    }

    fn transmit(&self, mut packet: Packet) {
        let mut fabric = self.lock();
        fabric.stats.sent += 1;

        match fabric.pick_fault(&packet) {
            Some(Fault::Drop) => {
                fabric.stats.dropped += 1;
                log::debug!("[sim] dropped {} seq={}", packet.header.flag, packet.header.seq);
            }
            Some(Fault::Corrupt) => {
                corrupt(&mut packet);
                fabric.stats.corrupted += 1;
                fabric.deliver(packet);
            }
            Some(Fault::Duplicate) => {
                fabric.stats.duplicated += 1;
                fabric.deliver(packet.clone());
                fabric.deliver(packet);
            }
            Some(Fault::Reorder) => {
                fabric.stats.reordered += 1;
                fabric.held.entry(packet.header.dst).or_default().push(packet);
            }
            None => fabric.deliver(packet),
        }
    }

    fn unbind(&self, addr: SocketAddr) {
        let mut fabric = self.lock();
        fabric.endpoints.remove(&addr);
        fabric.held.remove(&addr);
        log::debug!("[sim] unbound {addr}");
    }

    fn lock(&self) -> MutexGuard<'_, Fabric> {
        self.fabric.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Fabric {
    fn pick_fault(&mut self, packet: &Packet) -> Option<Fault> {
        if let Some(idx) = self.scripted.iter().position(|s| (s.matches)(packet)) {
            return self.scripted.remove(idx).map(|s| s.fault);
        }

        let SimulatorConfig {
            loss_rate,
            corrupt_rate,
            duplicate_rate,
            reorder_rate,
            ..
        } = self.config;
        if self.rng.random_bool(loss_rate.clamp(0.0, 1.0)) {
            Some(Fault::Drop)
        } else if self.rng.random_bool(corrupt_rate.clamp(0.0, 1.0)) {
            Some(Fault::Corrupt)
        } else if self.rng.random_bool(duplicate_rate.clamp(0.0, 1.0)) {
            Some(Fault::Duplicate)
        } else if self.rng.random_bool(reorder_rate.clamp(0.0, 1.0)) {
            Some(Fault::Reorder)
        } else {
            None
        }
    }

    /// Hand `packet` to its destination, then release anything it overtook.
    fn deliver(&mut self, packet: Packet) {
        let dst = packet.header.dst;
        let overtaken = self.held.remove(&dst).unwrap_or_default();

        let Some(inbox) = self.endpoints.get(&dst) else {
            // Nobody bound there: the datagram vanishes.
            self.stats.dropped += 1 + overtaken.len() as u64;
            return;
        };
        let mut delivered = 0;
        for p in std::iter::once(packet).chain(overtaken) {
            if inbox.send(p).is_ok() {
                delivered += 1;
            }
        }
        self.stats.delivered += delivered;
    }
}

/// Flip bits in the payload, or in the sequence number of an empty packet.
/// The checksum is deliberately left stale.
fn corrupt(packet: &mut Packet) {
    match packet.payload.first_mut() {
        Some(byte) => *byte ^= 0xff,
        None => packet.header.seq ^= 0x00ff_0000,
    }
}

/// An endpoint on a [`SimNetwork`].  Dropping it frees the address.
pub struct SimSocket {
    local_addr: SocketAddr,
    network: SimNetwork,
    inbox: tokio::sync::Mutex<mpsc::UnboundedReceiver<Packet>>,
}

impl SimSocket {
    pub fn network(&self) -> &SimNetwork {
        &self.network
    }
}

impl std::fmt::Debug for SimSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimSocket")
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}

impl Drop for SimSocket {
    fn drop(&mut self) {
        self.network.unbind(self.local_addr);
    }
}

impl Transport for SimSocket {
    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn send_once(&self, packet: &Packet) -> Result<(), TransportError> {
        self.network.transmit(packet.clone());
        Ok(())
    }

    async fn receive_once(
        &self,
        block_until_match: bool,
        timeout: Duration,
    ) -> Result<Option<Packet>, TransportError> {
        let mut inbox = self.inbox.lock().await;

        if block_until_match {
            loop {
                match inbox.recv().await {
                    Some(p) if p.header.flag == Flag::Syn => return Ok(Some(p)),
                    Some(_) => continue,
                    None => return Err(TransportError::NetworkDown),
                }
            }
        }

        match tokio::time::timeout(timeout, inbox.recv()).await {
            Ok(Some(p)) => Ok(Some(p)),
            Ok(None) => Err(TransportError::NetworkDown),
            Err(_elapsed) => Ok(None),
        }
    }

    async fn bind_port(&self, port: u16) -> Result<Self, TransportError> {
        self.network.bind(SocketAddr::new(self.local_addr.ip(), port))
    }
}
