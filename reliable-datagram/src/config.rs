//! Timeout and retry parameters for one connection.
//!
//! Every wait in the protocol is a single fixed-length wait per attempt; the
//! number of attempts is bounded by [`ConnectionConfig::max_send_tries`] or
//! [`ConnectionConfig::max_receive_tries`].  There is no RTO estimation.

use std::time::Duration;

/// Adjustable timeout parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// How long each attempt waits for a reply before it counts as lost.
    pub timeout: Duration,
    /// Attempts per outbound packet (SYN, data, FIN) before giving up.
    pub max_send_tries: u32,
    /// Consecutive empty waits tolerated by `receive()` and FIN_WAIT_2.
    pub max_receive_tries: u32,
    /// Time spent in TIME_WAIT re-acknowledging a retransmitted peer FIN.
    pub time_wait_linger: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(1000),
            max_send_tries: 6,
            max_receive_tries: 6,
            time_wait_linger: Duration::from_secs(2),
        }
    }
}

impl ConnectionConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Values below 1 are raised to 1 so every packet is sent at least once.
    pub fn with_max_send_tries(mut self, tries: u32) -> Self {
        self.max_send_tries = tries.max(1);
        self
    }

    pub fn with_max_receive_tries(mut self, tries: u32) -> Self {
        self.max_receive_tries = tries.max(1);
        self
    }

    pub fn with_time_wait_linger(mut self, linger: Duration) -> Self {
        self.time_wait_linger = linger;
        self
    }
}
