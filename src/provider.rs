//! Provider-facing contracts.
//!
//! The core consumes every external signal through a typed channel owned by
//! its provider; a single fan-in loop in the engine drains them all. No
//! provider error ever crosses into the core: a provider that cannot supply
//! a value sends nothing, and lookups resolve to `None`.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::classify::BluetoothConnectionRecord;
use crate::domain::BatteryEvent;
use crate::domain::LockTransition;
use crate::domain::PlaybackSnapshot;
use crate::domain::SourceKind;
use crate::select::SelectionMode;

/// Depth of each provider channel before senders are backpressured.
pub const CHANNEL_DEPTH: usize = 64;

/// A playback-side update from a media provider.
#[derive(Debug, Clone)]
pub enum PlaybackUpdate {
    /// A fresh snapshot for a source, replacing its previous one wholesale.
    Snapshot(SourceKind, PlaybackSnapshot),
    /// The provider for a source was torn down; its state is discarded.
    SourceDown(SourceKind),
}

/// Best-effort playback commands routed to the active source's controller.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum MediaCommand {
    Play,
    Pause,
    Next,
    Previous,
    Seek { position_secs: f64 },
    SetVolume { volume: f64 },
    SetFavorite { favorite: bool },
    ToggleShuffle,
    CycleRepeat,
}

/// Control-plane inputs from the embedding application.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum EngineCommand {
    SetSelectionMode { mode: SelectionMode },
    SetInlineHud { active: bool },
    SetLockIcon { visible: bool },
    SetTimers { running: usize, visible_height: u32 },
    SetFileTray { files: usize, expanding: bool },
    /// The unlock presentation sequence reports completion.
    UnlockPresentationDone,
    Media(MediaCommand),
}

/// Sender halves handed out to signal providers.
///
/// Each provider owns its channel; dropping a sender tears the provider
/// down without affecting the others.
#[derive(Debug, Clone)]
pub struct ProviderChannels {
    pub playback: mpsc::Sender<PlaybackUpdate>,
    /// Raw battery events; these pass through the coalescer first.
    pub battery: mpsc::Sender<BatteryEvent>,
    pub bluetooth: mpsc::Sender<BluetoothConnectionRecord>,
    pub lock: mpsc::Sender<LockTransition>,
    pub command: mpsc::Sender<EngineCommand>,
}

/// Per-device battery lookup for Bluetooth accessories.
///
/// May legitimately return `None`: accessory battery data often is not yet
/// available at the moment the connect event fires.
#[async_trait]
pub trait AccessoryBatteryLookup: Send + Sync {
    async fn lookup(&self, address: &str, name: &str) -> Option<u8>;
}

/// A lookup that knows nothing. The neutral default.
#[derive(Debug, Default)]
pub struct NoAccessoryBattery;

#[async_trait]
impl AccessoryBatteryLookup for NoAccessoryBattery {
    async fn lookup(&self, _address: &str, _name: &str) -> Option<u8> {
        None
    }
}

/// Fixed address→percent table, used by the replay harness and tests.
#[derive(Debug, Default)]
pub struct StaticBatteryLevels {
    levels: HashMap<String, u8>,
}

impl StaticBatteryLevels {
    pub fn new(levels: HashMap<String, u8>) -> Self {
        Self { levels }
    }
}

#[async_trait]
impl AccessoryBatteryLookup for StaticBatteryLevels {
    async fn lookup(&self, address: &str, _name: &str) -> Option<u8> {
        self.levels.get(address).copied()
    }
}

/// Controller for one media source.
///
/// All commands are best-effort with no return value guarantee; the
/// capability flags are static descriptions of the controller, read once
/// when its source becomes active.
#[async_trait]
pub trait MediaController: Send + Sync {
    async fn play(&self);
    async fn pause(&self);
    async fn next(&self);
    async fn previous(&self);
    async fn seek(&self, position_secs: f64);
    async fn set_volume(&self, volume: f64);
    async fn set_favorite(&self, favorite: bool);
    async fn toggle_shuffle(&self);
    async fn cycle_repeat(&self);

    fn supports_volume(&self) -> bool {
        false
    }
    fn supports_favorite(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_accessory_battery_is_neutral() {
        let lookup = NoAccessoryBattery;
        assert_eq!(lookup.lookup("aa:bb", "AirPods").await, None);
    }

    #[tokio::test]
    async fn test_static_battery_levels() {
        let mut levels = HashMap::new();
        levels.insert("aa:bb".to_string(), 85);
        let lookup = StaticBatteryLevels::new(levels);

        assert_eq!(lookup.lookup("aa:bb", "AirPods").await, Some(85));
        assert_eq!(lookup.lookup("cc:dd", "AirPods").await, None);
    }
}
