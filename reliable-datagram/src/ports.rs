//! Local port reservation for passively opened connections.
//!
//! Every connection spawned by `accept()` moves to its own local port so the
//! listening port stays free for the next SYN.  [`PortAllocator`] hands out
//! those ports from a fixed range.  It is a cheap, cloneable handle: clones
//! share one registry, so listeners accepting concurrently never receive the
//! same port while a [`PortLease`] for it is alive.

use std::collections::HashSet;
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rand::Rng;
use thiserror::Error;

/// Default range for spawned connections.
pub const DEFAULT_PORT_RANGE: RangeInclusive<u16> = 5556..=6555;

/// Every port in the range is currently leased.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no free port in {first}..={last}")]
pub struct PortsExhausted {
    pub first: u16,
    pub last: u16,
}

/// Thread-safe registry of reserved ports.
#[derive(Debug, Clone)]
pub struct PortAllocator {
    inner: Arc<Mutex<Registry>>,
}

#[derive(Debug)]
struct Registry {
    range: RangeInclusive<u16>,
    reserved: HashSet<u16>,
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_PORT_RANGE)
    }
}

impl PortAllocator {
    pub fn new(range: RangeInclusive<u16>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Registry {
                range,
                reserved: HashSet::new(),
            })),
        }
    }

    /// Reserve the first free port, scanning from a random point in the range.
    ///
    /// Each port is tried at most once, so the call is bounded by the size
    /// of the range.
    pub fn reserve_port(&self) -> Result<PortLease, PortsExhausted> {
        let mut registry = self.lock();
        let first = *registry.range.start();
        let last = *registry.range.end();
        let exhausted = PortsExhausted { first, last };
        if first > last {
            return Err(exhausted);
        }

        let span = u32::from(last) - u32::from(first) + 1;
        let start = rand::rng().random_range(0..span);

        for offset in 0..span {
            let port = (u32::from(first) + (start + offset) % span) as u16;
            if registry.reserved.insert(port) {
                log::debug!("[ports] reserved {port}");
                return Ok(PortLease {
                    port,
                    allocator: self.clone(),
                });
            }
        }
        log::warn!("[ports] range {first}..={last} exhausted");
        Err(exhausted)
    }

    pub fn is_reserved(&self, port: u16) -> bool {
        self.lock().reserved.contains(&port)
    }

    /// Number of ports currently leased.
    pub fn reserved_count(&self) -> usize {
        self.lock().reserved.len()
    }

    fn release(&self, port: u16) {
        if self.lock().reserved.remove(&port) {
            log::debug!("[ports] released {port}");
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        // The registry stays consistent even if a holder panicked mid-scan.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A reserved port.  Dropping the lease returns the port to the allocator.
#[derive(Debug)]
pub struct PortLease {
    port: u16,
    allocator: PortAllocator,
}

impl PortLease {
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for PortLease {
    fn drop(&mut self) {
        self.allocator.release(self.port);
    }
}
