//! Provider event timelines.
//!
//! The replay harness drives the full pipeline from a JSON-lines file:
//! one entry per line, each with a millisecond offset and a provider
//! event. Blank lines and `#` comments are skipped; anything else that
//! fails to parse is an error carrying its line number.

use std::io::BufRead;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tokio::time::sleep_until;
use tracing::debug;
use tracing::warn;

use crate::classify::BluetoothConnectionRecord;
use crate::domain::BatteryEvent;
use crate::domain::LockTransition;
use crate::domain::PlaybackSnapshot;
use crate::domain::RepeatMode;
use crate::domain::SourceKind;
use crate::provider::EngineCommand;
use crate::provider::PlaybackUpdate;
use crate::provider::ProviderChannels;

/// Errors raised while reading a timeline file.
#[derive(Error, Debug)]
pub enum TimelineError {
    #[error("Failed to read timeline: {0}")]
    Io(#[from] std::io::Error),

    #[error("Line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Line {line}: invalid artwork encoding: {source}")]
    Artwork {
        line: usize,
        #[source]
        source: base64::DecodeError,
    },

    #[error("Line {line}: entries must be ordered by at_ms")]
    OutOfOrder { line: usize },
}

/// One timeline line as written in the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TimelineEntry {
    at_ms: u64,
    event: TimelineEvent,
}

/// Wire form of a provider event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum TimelineEvent {
    Playback {
        source: SourceKind,
        #[serde(flatten)]
        snapshot: SnapshotSpec,
    },
    SourceDown {
        source: SourceKind,
    },
    Battery {
        #[serde(flatten)]
        event: BatteryEvent,
    },
    Bluetooth {
        #[serde(flatten)]
        record: BluetoothConnectionRecord,
    },
    Lock {
        transition: LockTransition,
    },
    Command {
        #[serde(flatten)]
        command: EngineCommand,
    },
}

/// Wire form of a playback snapshot; artwork travels base64-encoded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct SnapshotSpec {
    is_playing: bool,
    title: String,
    artist: String,
    album: String,
    artwork_base64: Option<String>,
    bundle_id: Option<String>,
    position_secs: f64,
    duration_secs: f64,
    playback_rate: f64,
    shuffle: bool,
    repeat: RepeatMode,
    volume: f64,
    is_favorite: bool,
}

impl SnapshotSpec {
    fn into_snapshot(self, line: usize) -> Result<PlaybackSnapshot, TimelineError> {
        let artwork = match self.artwork_base64 {
            Some(encoded) => Some(
                BASE64
                    .decode(encoded.as_bytes())
                    .map_err(|source| TimelineError::Artwork { line, source })?,
            ),
            None => None,
        };

        Ok(PlaybackSnapshot {
            is_playing: self.is_playing,
            title: self.title,
            artist: self.artist,
            album: self.album,
            artwork,
            bundle_id: self.bundle_id,
            position_secs: self.position_secs,
            duration_secs: self.duration_secs,
            playback_rate: self.playback_rate,
            shuffle: self.shuffle,
            repeat: self.repeat,
            volume: self.volume,
            is_favorite: self.is_favorite,
        })
    }
}

/// A resolved provider event ready to feed into the engine channels.
#[derive(Debug, Clone)]
pub enum ProviderFeed {
    Playback(PlaybackUpdate),
    Battery(BatteryEvent),
    Bluetooth(BluetoothConnectionRecord),
    Lock(LockTransition),
    Command(EngineCommand),
}

/// A provider event with its offset from timeline start.
#[derive(Debug, Clone)]
pub struct ScheduledEvent {
    pub at: Duration,
    pub event: ProviderFeed,
}

/// Parse a JSON-lines timeline.
pub fn parse_timeline(reader: impl BufRead) -> Result<Vec<ScheduledEvent>, TimelineError> {
    let mut events = Vec::new();
    let mut last_at = 0u64;

    for (index, line) in reader.lines().enumerate() {
        let line_no = index + 1;
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let entry: TimelineEntry = serde_json::from_str(trimmed).map_err(|source| {
            TimelineError::Parse {
                line: line_no,
                source,
            }
        })?;

        if entry.at_ms < last_at {
            return Err(TimelineError::OutOfOrder { line: line_no });
        }
        last_at = entry.at_ms;

        let event = match entry.event {
            TimelineEvent::Playback { source, snapshot } => ProviderFeed::Playback(
                PlaybackUpdate::Snapshot(source, snapshot.into_snapshot(line_no)?),
            ),
            TimelineEvent::SourceDown { source } => {
                ProviderFeed::Playback(PlaybackUpdate::SourceDown(source))
            }
            TimelineEvent::Battery { event } => ProviderFeed::Battery(event),
            TimelineEvent::Bluetooth { record } => ProviderFeed::Bluetooth(record),
            TimelineEvent::Lock { transition } => ProviderFeed::Lock(transition),
            TimelineEvent::Command { command } => ProviderFeed::Command(command),
        };

        events.push(ScheduledEvent {
            at: Duration::from_millis(entry.at_ms),
            event,
        });
    }

    Ok(events)
}

/// Feed a parsed timeline into the provider channels in real (or scaled)
/// time. Stops early if the engine goes away.
pub async fn play(events: &[ScheduledEvent], channels: &ProviderChannels, speed: f64) {
    let start = Instant::now();
    debug!("Replaying {} event(s) at {}x", events.len(), speed);

    for scheduled in events {
        let at = if (speed - 1.0).abs() < f64::EPSILON {
            scheduled.at
        } else {
            scheduled.at.div_f64(speed)
        };
        sleep_until(start + at).await;

        let delivered = match scheduled.event.clone() {
            ProviderFeed::Playback(update) => channels.playback.send(update).await.is_ok(),
            ProviderFeed::Battery(event) => channels.battery.send(event).await.is_ok(),
            ProviderFeed::Bluetooth(record) => channels.bluetooth.send(record).await.is_ok(),
            ProviderFeed::Lock(transition) => channels.lock.send(transition).await.is_ok(),
            ProviderFeed::Command(command) => channels.command.send(command).await.is_ok(),
        };

        if !delivered {
            warn!("Engine went away mid-replay, stopping");
            return;
        }
    }
}
