//! Lock-transition suppression gate.
//!
//! Two independently animated presentation layers must never draw in the
//! same region simultaneously. The gate is level-triggered: while set, the
//! compositor yields nothing at all. It is set on lock-begin, held through
//! unlock-begin, and cleared only when the unlock presentation sequence
//! reports completion or the settle timeout expires.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateState {
    Clear,
    Locked,
    Unlocking { since: Instant },
}

/// Suppression gate for lock/unlock transitions.
#[derive(Debug)]
pub struct LockGate {
    state: GateState,
    settle_timeout: Duration,
}

impl LockGate {
    /// Create a gate with the given unlock settle timeout.
    pub fn new(settle_timeout: Duration) -> Self {
        Self {
            state: GateState::Clear,
            settle_timeout,
        }
    }

    /// True while the gate suppresses all display output.
    pub fn is_suppressed(&self) -> bool {
        self.state != GateState::Clear
    }

    /// Lock began: set the gate and leave it set.
    pub fn on_lock(&mut self) {
        debug!("Lock transition began, gate set");
        self.state = GateState::Locked;
    }

    /// Unlock began: keep the gate set until the presentation sequence
    /// reports completion.
    pub fn on_unlock_begin(&mut self, now: Instant) {
        debug!("Unlock transition began, gate held");
        self.state = GateState::Unlocking { since: now };
    }

    /// The unlock presentation sequence finished; clear the gate.
    pub fn on_unlock_settled(&mut self) {
        if self.is_suppressed() {
            debug!("Unlock presentation settled, gate cleared");
        }
        self.state = GateState::Clear;
    }

    /// When the settle timeout safety net fires, if pending.
    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            GateState::Unlocking { since } => Some(since + self.settle_timeout),
            _ => None,
        }
    }

    /// Clear the gate if its settle deadline has passed. The safety net
    /// that guarantees the gate can never remain stuck set.
    pub fn expire(&mut self, now: Instant) {
        if let Some(deadline) = self.deadline()
            && now >= deadline
        {
            warn!("Unlock presentation never settled, clearing gate on timeout");
            self.state = GateState::Clear;
        }
    }
}
