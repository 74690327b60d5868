//! Link state machine for the programming-port exchange.

use std::fmt;

/// Where the host is in one ENQ/ACK/request/response cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    /// Nothing in flight.
    #[default]
    Idle,
    /// ENQ sent, waiting for the device's ACK.
    AwaitingAck,
    /// Handshake done; a request may be sent.
    Ready,
    /// Request sent, waiting for a framed response or ACK.
    AwaitingResponse,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Idle => write!(f, "IDLE"),
            LinkState::AwaitingAck => write!(f, "AWAITING_ACK"),
            LinkState::Ready => write!(f, "READY"),
            LinkState::AwaitingResponse => write!(f, "AWAITING_RESPONSE"),
        }
    }
}

impl LinkState {
    /// True while the host is blocked on the device.
    pub fn is_waiting(&self) -> bool {
        matches!(self, LinkState::AwaitingAck | LinkState::AwaitingResponse)
    }
}

/// Runtime state of one link.
#[derive(Debug, Default)]
pub struct LinkStateMachine {
    /// Current link state.
    pub state: LinkState,
    /// Completed request/response cycles.
    pub exchanges: u64,
    /// Cycles that ended in an error.
    pub failures: u64,
}

impl LinkStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transition to a new state.
    pub fn goto_state(&mut self, new_state: LinkState) {
        if self.state == new_state {
            return;
        }
        tracing::debug!(from = %self.state, to = %new_state, "Link state transition");
        if self.state == LinkState::AwaitingResponse && new_state == LinkState::Idle {
            self.exchanges += 1;
        }
        self.state = new_state;
    }

    /// Drop back to idle after a failed cycle.
    pub fn fail(&mut self) {
        self.failures += 1;
        tracing::debug!(from = %self.state, to = %LinkState::Idle, "Link reset after failure");
        self.state = LinkState::Idle;
    }
}
