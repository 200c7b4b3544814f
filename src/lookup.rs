//! Retrying lookups with stale-completion discard.
//!
//! Accessory data often is not yet available at the moment the triggering
//! event fires, so lookups retry in a short burst at increasing offsets.
//! Completions are ordered by issue, not by arrival: each key carries a
//! monotonic token, and a completion whose token is no longer current is
//! dropped silently.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::debug;
use tracing::trace;

use crate::provider::AccessoryBatteryLookup;

/// Retry offsets from the issuing instant.
pub const RETRY_OFFSETS: [Duration; 5] = [
    Duration::ZERO,
    Duration::from_millis(400),
    Duration::from_millis(900),
    Duration::from_millis(1600),
    Duration::from_millis(2600),
];

/// Monotonic request tokens per key.
///
/// `issue` hands out a fresh token and makes it the current one for its
/// key; `is_current` tells whether a completion may still be applied.
#[derive(Debug)]
pub struct TokenLedger<K> {
    current: HashMap<K, u64>,
    next: u64,
}

impl<K: Eq + Hash> Default for TokenLedger<K> {
    fn default() -> Self {
        Self {
            current: HashMap::new(),
            next: 0,
        }
    }
}

impl<K: Eq + Hash> TokenLedger<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh token for `key`, superseding any earlier one.
    pub fn issue(&mut self, key: K) -> u64 {
        self.next += 1;
        let token = self.next;
        self.current.insert(key, token);
        token
    }

    /// True iff `token` is still the latest issued for `key`.
    pub fn is_current(&self, key: &K, token: u64) -> bool {
        self.current.get(key) == Some(&token)
    }
}

/// Completed accessory battery lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupOutcome {
    pub address: String,
    pub token: u64,
    pub percent: u8,
}

/// Run a battery-percent lookup with the fixed retry schedule.
///
/// The first attempt that yields a value wins and is reported with the
/// issuing token; exhausting the schedule reports nothing at all. The
/// caller decides staleness against its ledger on receipt.
pub fn spawn_battery_lookup(
    provider: Arc<dyn AccessoryBatteryLookup>,
    address: String,
    name: String,
    token: u64,
    tx: mpsc::UnboundedSender<LookupOutcome>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut elapsed = Duration::ZERO;
        for (attempt, offset) in RETRY_OFFSETS.iter().enumerate() {
            sleep(*offset - elapsed).await;
            elapsed = *offset;

            if let Some(percent) = provider.lookup(&address, &name).await {
                trace!(
                    "Battery lookup for {} resolved to {}% on attempt {}",
                    address,
                    percent,
                    attempt + 1
                );
                let _ = tx.send(LookupOutcome {
                    address,
                    token,
                    percent,
                });
                return;
            }
        }

        debug!("Battery lookup for {} exhausted all retries", address);
    })
}
