//! Core value types shared across the arbitration pipeline.

use serde::Deserialize;
use serde::Serialize;

/// A logical origin of playback state.
///
/// `System` is the OS-level now-playing aggregator; the remaining variants
/// are independently polled player apps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// OS-level now-playing aggregator.
    System,
    /// First-party music app.
    Music,
    Spotify,
    Podcasts,
}

/// Player-app sources, in registration order. Excludes `System`.
pub const APP_SOURCES: [SourceKind; 3] =
    [SourceKind::Music, SourceKind::Spotify, SourceKind::Podcasts];

impl SourceKind {
    /// Get the source as a string for logging.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Music => "music",
            Self::Spotify => "spotify",
            Self::Podcasts => "podcasts",
        }
    }
}

/// Static capability flags of a source's controller.
///
/// These describe what the controller can do, not what the current track
/// allows; they change only when the active source changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceCaps {
    pub supports_volume: bool,
    pub supports_favorite: bool,
}

/// Repeat behavior reported by a player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatMode {
    #[default]
    Off,
    Playlist,
    Track,
}

/// One source's complete state at a point in time.
///
/// Snapshots are replaced wholesale on every provider callback, never
/// field-merged. The update timestamp lives in the source table, not here;
/// a source with no stored snapshot has never reported.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlaybackSnapshot {
    pub is_playing: bool,
    pub title: String,
    pub artist: String,
    pub album: String,
    /// Raw artwork bytes as handed over by the provider.
    pub artwork: Option<Vec<u8>>,
    /// Application identity reported by the provider.
    pub bundle_id: Option<String>,
    pub position_secs: f64,
    pub duration_secs: f64,
    pub playback_rate: f64,
    pub shuffle: bool,
    pub repeat: RepeatMode,
    pub volume: f64,
    pub is_favorite: bool,
}

/// System battery state assembled from hardware events.
///
/// The `Default` value is the neutral "provider unavailable" reading;
/// nothing downstream renders battery UI until an event arrives, so the
/// default is indistinguishable from no signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatteryStatus {
    pub plugged_in: bool,
    pub charging: bool,
    pub level_percent: u8,
    pub max_capacity_percent: u8,
    pub low_power_mode: bool,
    pub time_to_full_minutes: Option<u32>,
}

impl Default for BatteryStatus {
    fn default() -> Self {
        Self {
            plugged_in: false,
            charging: false,
            level_percent: 0,
            max_capacity_percent: 100,
            low_power_mode: false,
            time_to_full_minutes: None,
        }
    }
}

impl BatteryStatus {
    /// Fold a hardware event into the assembled state.
    pub fn apply(&mut self, event: &BatteryEvent) {
        match *event {
            BatteryEvent::PowerSourceChanged { plugged_in } => {
                self.plugged_in = plugged_in;
                if !plugged_in {
                    self.charging = false;
                    self.time_to_full_minutes = None;
                }
            }
            BatteryEvent::LevelChanged { percent } => self.level_percent = percent.min(100),
            BatteryEvent::ChargingChanged { charging } => self.charging = charging,
            BatteryEvent::LowPowerModeChanged { enabled } => self.low_power_mode = enabled,
            BatteryEvent::TimeToFullChanged { minutes } => {
                self.time_to_full_minutes = Some(minutes);
            }
            BatteryEvent::MaxCapacityChanged { percent } => {
                self.max_capacity_percent = percent.min(100);
            }
            BatteryEvent::Error { .. } => {}
        }
    }
}

/// A single hardware battery notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BatteryEvent {
    PowerSourceChanged { plugged_in: bool },
    LevelChanged { percent: u8 },
    ChargingChanged { charging: bool },
    LowPowerModeChanged { enabled: bool },
    TimeToFullChanged { minutes: u32 },
    MaxCapacityChanged { percent: u8 },
    Error { reason: String },
}

/// Event kind, used as the coalescing key.
///
/// Variant order is the flush order: state-like signals before derived
/// numeric ones. The last two kinds bypass coalescing entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BatteryEventKind {
    ChargingChanged,
    LevelChanged,
    MaxCapacityChanged,
    TimeToFullChanged,
    LowPowerModeChanged,
    PowerSourceChanged,
    Error,
}

impl BatteryEvent {
    /// Get the coalescing kind of this event.
    pub fn kind(&self) -> BatteryEventKind {
        match self {
            Self::ChargingChanged { .. } => BatteryEventKind::ChargingChanged,
            Self::LevelChanged { .. } => BatteryEventKind::LevelChanged,
            Self::MaxCapacityChanged { .. } => BatteryEventKind::MaxCapacityChanged,
            Self::TimeToFullChanged { .. } => BatteryEventKind::TimeToFullChanged,
            Self::LowPowerModeChanged { .. } => BatteryEventKind::LowPowerModeChanged,
            Self::PowerSourceChanged { .. } => BatteryEventKind::PowerSourceChanged,
            Self::Error { .. } => BatteryEventKind::Error,
        }
    }
}

impl BatteryEventKind {
    /// Pass-through kinds are delivered immediately, never held for a flush.
    pub fn is_passthrough(self) -> bool {
        matches!(self, Self::PowerSourceChanged | Self::Error)
    }
}

/// Screen lock transition notification. Carries no payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockTransition {
    Locked,
    Unlocked,
}
