//! glancehud - signal arbitration core for a compact always-on HUD strip.
//!
//! Ingests independent, unreliable, asynchronous signal sources (media
//! players, battery hardware, Bluetooth connects, lock/unlock transitions)
//! and reduces them to a single prioritized, flicker-free display decision.
//!
//! Providers feed typed channels; one engine task owns all mutable state
//! and publishes per-group snapshots the presentation layer can read at
//! any time.

pub mod aggregate;
pub mod classify;
pub mod coalesce;
pub mod compose;
pub mod config;
pub mod debounce;
pub mod domain;
pub mod engine;
pub mod gate;
pub mod lookup;
pub mod provider;
pub mod replay;
pub mod select;

pub use compose::SlotActivity;
pub use compose::SlotDecision;
pub use config::Config;
pub use domain::BatteryEvent;
pub use domain::BatteryStatus;
pub use domain::LockTransition;
pub use domain::PlaybackSnapshot;
pub use domain::SourceKind;
pub use engine::Engine;
pub use engine::EngineOutputs;
pub use provider::ProviderChannels;
pub use select::SelectionMode;
