//! Latest-known state per playback source.
//!
//! Pure storage plus a staleness predicate. Policy (which source should
//! drive the UI) lives in the selector.

use std::collections::HashMap;

use tokio::time::Instant;

use crate::domain::PlaybackSnapshot;
use crate::domain::SourceKind;

#[derive(Debug, Clone)]
struct SourceEntry {
    snapshot: PlaybackSnapshot,
    updated_at: Instant,
}

/// Holds the latest snapshot per source.
///
/// A source with no entry has never reported (or has been torn down); it is
/// stale and never eligible for selection.
#[derive(Debug, Default)]
pub struct SourceTable {
    entries: HashMap<SourceKind, SourceEntry>,
}

impl SourceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a snapshot verbatim, replacing any previous value wholesale.
    pub fn update(&mut self, source: SourceKind, snapshot: PlaybackSnapshot, now: Instant) {
        self.entries.insert(
            source,
            SourceEntry {
                snapshot,
                updated_at: now,
            },
        );
    }

    /// Discard a source's state entirely (provider teardown).
    pub fn remove(&mut self, source: SourceKind) {
        self.entries.remove(&source);
    }

    /// Latest snapshot for a source, or `None` if it never reported.
    pub fn snapshot(&self, source: SourceKind) -> Option<&PlaybackSnapshot> {
        self.entries.get(&source).map(|e| &e.snapshot)
    }

    /// When the source last reported, or `None` if it never did.
    pub fn updated_at(&self, source: SourceKind) -> Option<Instant> {
        self.entries.get(&source).map(|e| e.updated_at)
    }

    /// True iff the source has never reported (or was torn down).
    pub fn is_stale(&self, source: SourceKind) -> bool {
        !self.entries.contains_key(&source)
    }
}
