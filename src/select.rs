//! Active source selection.
//!
//! Chooses which live media source should currently drive playback UI.
//! Selection re-runs on every snapshot change and on every mode change;
//! the decision is a pure function of the source table and the mode.

use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

use crate::aggregate::SourceTable;
use crate::domain::APP_SOURCES;
use crate::domain::SourceKind;

/// External preference for how the active source is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    /// Prefer the system now-playing source; arbitrate among player apps
    /// only when it is stale or absent.
    #[default]
    SystemWide,
    /// Always arbitrate among player apps, ignoring the system source.
    MusicOnly,
}

/// Pick the source that should drive playback UI, or `None` when nothing
/// has ever reported.
pub fn select_active(mode: SelectionMode, table: &SourceTable) -> Option<SourceKind> {
    match mode {
        SelectionMode::SystemWide => {
            if table.is_stale(SourceKind::System) {
                arbitrate_apps(table)
            } else {
                Some(SourceKind::System)
            }
        }
        SelectionMode::MusicOnly => arbitrate_apps(table),
    }
}

/// Arbitration among the player-app sources.
///
/// Among non-stale sources, a currently playing one with the latest update
/// wins; with nothing playing, the most recently updated source wins
/// regardless of play state. Paused is an acceptable "currently relevant"
/// state; never-updated is not.
fn arbitrate_apps(table: &SourceTable) -> Option<SourceKind> {
    let mut best_playing: Option<SourceKind> = None;
    let mut best_playing_at = None;
    let mut best_any: Option<SourceKind> = None;
    let mut best_any_at = None;

    for source in APP_SOURCES {
        let Some(at) = table.updated_at(source) else {
            continue;
        };
        let Some(snapshot) = table.snapshot(source) else {
            continue;
        };

        if best_any_at.is_none_or(|t| at > t) {
            best_any = Some(source);
            best_any_at = Some(at);
        }

        if snapshot.is_playing && best_playing_at.is_none_or(|t| at > t) {
            best_playing = Some(source);
            best_playing_at = Some(at);
        }
    }

    let chosen = best_playing.or(best_any);
    if let Some(source) = chosen {
        debug!("Arbitration chose source: {}", source.as_str());
    }
    chosen
}

/// Artwork for the active source, borrowing from the system source when the
/// active app has no usable artwork but the system reports the same
/// application identity. Prevents a visible flash to a generic placeholder
/// during brief artwork-unavailable windows.
pub fn effective_artwork<'a>(active: SourceKind, table: &'a SourceTable) -> Option<&'a [u8]> {
    let snapshot = table.snapshot(active)?;
    if let Some(ref artwork) = snapshot.artwork
        && !artwork.is_empty()
    {
        return Some(artwork);
    }

    if active != SourceKind::System
        && let Some(system) = table.snapshot(SourceKind::System)
        && system.bundle_id.is_some()
        && system.bundle_id == snapshot.bundle_id
        && let Some(ref artwork) = system.artwork
        && !artwork.is_empty()
    {
        return Some(artwork);
    }

    None
}
