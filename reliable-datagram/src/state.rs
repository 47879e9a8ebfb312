//! Connection finite-state machine (FSM) types.
//!
//! This module defines every state a [`crate::connection::Connection`] can
//! occupy and the table of legal edges between them.  The protocols that
//! drive the edges live in [`crate::handshake`], [`crate::delivery`] and
//! [`crate::teardown`]; they all go through
//! [`crate::connection::Connection`]'s single transition point, which checks
//! [`ConnectionState::can_transition_to`].

/// All possible states of the connection FSM.
///
/// ```text
//            connect                     SYN_ACK
//  CLOSED ───────────▶ SYN_SENT ────────────────────▶ ESTABLISHED
//    │                                                  ▲   │   │
//    │ accept        SYN            final ACK           │   │   │ peer FIN
//    └──────▶ LISTEN ────▶ SYN_RCVD ────────────────────┘   │   ▼
//                                                close   │  CLOSE_WAIT ──close──▶ CLOSED
//                                                        ▼
//      CLOSED ◀── TIME_WAIT ◀──peer FIN── FIN_WAIT_2 ◀──ACK── FIN_WAIT_1
/// ```
///
/// Retry exhaustion on any path forces `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No connection exists; initial and terminal state.
    #[default]
    Closed,
    /// Waiting for a SYN.
    Listen,
    /// SYN has been sent; waiting for SYN_ACK.
    SynSent,
    /// SYN received; SYN_ACK sent from a fresh port; waiting for ACK.
    SynReceived,
    /// Handshake complete; data transfer in progress.
    Established,
    /// Local side sent FIN; waiting for its ACK.
    FinWait1,
    /// Local FIN acknowledged; waiting for the peer's FIN.
    FinWait2,
    /// Peer's FIN received; local close pending.
    CloseWait,
    /// Both FINs exchanged; lingering before release.
    TimeWait,
}

impl ConnectionState {
    /// `true` when the FSM has an edge from `self` to `next`.
    ///
    /// Every state may fall back to `Closed` (retry exhaustion or teardown
    /// completion), and `Listen` is re-entered after each accept attempt.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        if next == Closed {
            return true;
        }
        matches!(
            (self, next),
            (Closed, SynSent)
                | (Closed, Listen)
                | (Listen, SynReceived)
                | (SynReceived, Listen)
                | (SynSent, Established)
                | (SynReceived, Established)
                | (Established, FinWait1)
                | (Established, CloseWait)
                | (FinWait1, FinWait2)
                | (FinWait2, TimeWait)
        )
    }

    /// States in which `close()` is allowed.
    pub fn is_closable(self) -> bool {
        matches!(self, ConnectionState::Established | ConnectionState::CloseWait)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Closed => "CLOSED",
            ConnectionState::Listen => "LISTEN",
            ConnectionState::SynSent => "SYN_SENT",
            ConnectionState::SynReceived => "SYN_RCVD",
            ConnectionState::Established => "ESTABLISHED",
            ConnectionState::FinWait1 => "FIN_WAIT_1",
            ConnectionState::FinWait2 => "FIN_WAIT_2",
            ConnectionState::CloseWait => "CLOSE_WAIT",
            ConnectionState::TimeWait => "TIME_WAIT",
        };
        f.write_str(name)
    }
}
