//! The arbitration engine.
//!
//! One task owns every piece of mutable arbitration state. Providers feed
//! typed channels from arbitrary contexts; the engine drains them all in a
//! single fan-in loop, so presentation reads are always consistent
//! snapshots and never partially-updated structures.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use crate::aggregate::SourceTable;
use crate::classify::BluetoothConnectionRecord;
use crate::classify::Classifier;
use crate::classify::ConnectDebouncer;
use crate::classify::DeviceKind;
use crate::coalesce::Coalescer;
use crate::compose::ActivityToggles;
use crate::compose::SlotActivity;
use crate::compose::SlotDecision;
use crate::compose::SlotInputs;
use crate::compose::compose;
use crate::config::Config;
use crate::debounce::Debounce;
use crate::domain::BatteryEvent;
use crate::domain::BatteryStatus;
use crate::domain::LockTransition;
use crate::domain::PlaybackSnapshot;
use crate::domain::SourceCaps;
use crate::domain::SourceKind;
use crate::gate::LockGate;
use crate::lookup::LookupOutcome;
use crate::lookup::TokenLedger;
use crate::lookup::spawn_battery_lookup;
use crate::provider::AccessoryBatteryLookup;
use crate::provider::CHANNEL_DEPTH;
use crate::provider::EngineCommand;
use crate::provider::MediaCommand;
use crate::provider::MediaController;
use crate::provider::PlaybackUpdate;
use crate::provider::ProviderChannels;
use crate::select::SelectionMode;
use crate::select::effective_artwork;
use crate::select::select_active;

/// Internal one-shot timer completions, fed back through the fan-in loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerFired {
    BatteryPopupExpired,
    BluetoothPopupExpired,
    IdleQuietPeriodElapsed,
    UnlockSettleTimedOut,
}

/// The currently selected media source with its snapshot and the static
/// capability flags of its controller.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveMedia {
    pub source: SourceKind,
    pub caps: SourceCaps,
    pub snapshot: PlaybackSnapshot,
}

/// An open Bluetooth connect popup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BluetoothPopup {
    pub kind: DeviceKind,
    pub name: String,
    pub address: String,
    pub battery_percent: Option<u8>,
}

/// Read-side handles for the presentation layer, one per state group.
#[derive(Debug, Clone)]
pub struct EngineOutputs {
    pub decision: watch::Receiver<SlotDecision>,
    pub playback: watch::Receiver<Option<ActiveMedia>>,
    pub battery: watch::Receiver<BatteryStatus>,
    pub bluetooth: watch::Receiver<Option<BluetoothPopup>>,
    pub locked: watch::Receiver<bool>,
}

impl EngineOutputs {
    /// The activity owning the primary display slot right now.
    pub fn primary_slot(&self) -> Option<SlotActivity> {
        self.decision.borrow().primary
    }

    /// The activity owning the compact secondary slot right now.
    pub fn secondary_slot(&self) -> Option<SlotActivity> {
        self.decision.borrow().secondary
    }

    /// Snapshot of the currently selected media source.
    pub fn active_media(&self) -> Option<ActiveMedia> {
        self.playback.borrow().clone()
    }
}

/// Timing and toggle settings resolved from configuration.
#[derive(Debug, Clone)]
struct Settings {
    coalesce_window: Duration,
    battery_popup_lifetime: Duration,
    bluetooth_popup_lifetime: Duration,
    idle_quiet_period: Duration,
    toggles: ActivityToggles,
}

/// Signals mirrored from sibling subsystems through engine commands.
#[derive(Debug, Default)]
struct ExternalSignals {
    inline_hud: bool,
    lock_icon: bool,
    timers_running: usize,
    timer_height: u32,
    tray_files: usize,
    tray_expanding: bool,
}

/// The arbitration engine. Construct with [`Engine::new`], register
/// controllers, then hand it to a task via [`Engine::run`].
pub struct Engine {
    playback_rx: mpsc::Receiver<PlaybackUpdate>,
    coalesced_rx: mpsc::Receiver<BatteryEvent>,
    bluetooth_rx: mpsc::Receiver<BluetoothConnectionRecord>,
    lock_rx: mpsc::Receiver<LockTransition>,
    command_rx: mpsc::Receiver<EngineCommand>,

    /// Raw battery receiver, moved into the coalescer task on startup.
    battery_raw_rx: Option<mpsc::Receiver<BatteryEvent>>,
    coalesced_tx: mpsc::Sender<BatteryEvent>,

    timer_tx: mpsc::UnboundedSender<TimerFired>,
    timer_rx: mpsc::UnboundedReceiver<TimerFired>,
    lookup_tx: mpsc::UnboundedSender<LookupOutcome>,
    lookup_rx: mpsc::UnboundedReceiver<LookupOutcome>,

    settings: Settings,

    table: SourceTable,
    mode: SelectionMode,
    active: Option<SourceKind>,
    caps: SourceCaps,
    controllers: HashMap<SourceKind, Arc<dyn MediaController>>,

    battery: BatteryStatus,
    battery_popup: bool,
    battery_popup_timer: Debounce,

    classifier: Classifier,
    connect_debouncer: ConnectDebouncer,
    bluetooth_popup: Option<BluetoothPopup>,
    bluetooth_popup_timer: Debounce,
    ledger: TokenLedger<String>,
    battery_lookup: Arc<dyn AccessoryBatteryLookup>,

    gate: LockGate,
    unlock_settle_timer: Debounce,
    locked: bool,

    idle: bool,
    idle_timer: Debounce,

    signals: ExternalSignals,

    decision_tx: watch::Sender<SlotDecision>,
    playback_tx: watch::Sender<Option<ActiveMedia>>,
    battery_tx: watch::Sender<BatteryStatus>,
    bluetooth_tx: watch::Sender<Option<BluetoothPopup>>,
    locked_tx: watch::Sender<bool>,
}

impl Engine {
    /// Build an engine from configuration.
    ///
    /// Returns the engine itself, the sender bundle for providers, and the
    /// read-side handles for the presentation layer.
    pub fn new(
        config: &Config,
        battery_lookup: Arc<dyn AccessoryBatteryLookup>,
    ) -> (Self, ProviderChannels, EngineOutputs) {
        let (playback_tx_p, playback_rx) = mpsc::channel(CHANNEL_DEPTH);
        let (battery_raw_tx, battery_raw_rx) = mpsc::channel(CHANNEL_DEPTH);
        let (coalesced_tx, coalesced_rx) = mpsc::channel(CHANNEL_DEPTH);
        let (bluetooth_tx_p, bluetooth_rx) = mpsc::channel(CHANNEL_DEPTH);
        let (lock_tx_p, lock_rx) = mpsc::channel(CHANNEL_DEPTH);
        let (command_tx_p, command_rx) = mpsc::channel(CHANNEL_DEPTH);
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let (lookup_tx, lookup_rx) = mpsc::unbounded_channel();

        let (decision_tx, decision_watch) = watch::channel(SlotDecision::default());
        let (playback_tx, playback_watch) = watch::channel(None);
        let (battery_tx, battery_watch) = watch::channel(BatteryStatus::default());
        let (bluetooth_tx, bluetooth_watch) = watch::channel(None);
        let (locked_tx, locked_watch) = watch::channel(false);

        let channels = ProviderChannels {
            playback: playback_tx_p,
            battery: battery_raw_tx,
            bluetooth: bluetooth_tx_p,
            lock: lock_tx_p,
            command: command_tx_p,
        };

        let outputs = EngineOutputs {
            decision: decision_watch,
            playback: playback_watch,
            battery: battery_watch,
            bluetooth: bluetooth_watch,
            locked: locked_watch,
        };

        let engine = Self {
            playback_rx,
            coalesced_rx,
            bluetooth_rx,
            lock_rx,
            command_rx,
            battery_raw_rx: Some(battery_raw_rx),
            coalesced_tx,
            timer_tx,
            timer_rx,
            lookup_tx,
            lookup_rx,
            settings: Settings {
                coalesce_window: Duration::from_millis(config.coalesce_window_ms),
                battery_popup_lifetime: Duration::from_secs(config.battery_popup_seconds),
                bluetooth_popup_lifetime: Duration::from_secs(config.bluetooth_popup_seconds),
                idle_quiet_period: Duration::from_secs(config.idle_face_delay_seconds),
                toggles: config.toggles(),
            },
            table: SourceTable::new(),
            mode: config.selection_mode,
            active: None,
            caps: SourceCaps::default(),
            controllers: HashMap::new(),
            battery: BatteryStatus::default(),
            battery_popup: false,
            battery_popup_timer: Debounce::new(),
            classifier: Classifier::new(config.device_denylist.clone()),
            connect_debouncer: ConnectDebouncer::new(Duration::from_millis(
                config.connect_refractory_ms,
            )),
            bluetooth_popup: None,
            bluetooth_popup_timer: Debounce::new(),
            ledger: TokenLedger::new(),
            battery_lookup,
            gate: LockGate::new(Duration::from_millis(config.unlock_settle_timeout_ms)),
            unlock_settle_timer: Debounce::new(),
            locked: false,
            idle: false,
            idle_timer: Debounce::new(),
            signals: ExternalSignals::default(),
            decision_tx,
            playback_tx,
            battery_tx,
            bluetooth_tx,
            locked_tx,
        };

        (engine, channels, outputs)
    }

    /// Register the controller for a source. Its capability flags take
    /// effect whenever that source becomes active.
    pub fn register_controller(&mut self, source: SourceKind, controller: Arc<dyn MediaController>) {
        self.controllers.insert(source, controller);
    }

    /// Run the fan-in loop until the token is cancelled.
    pub async fn run(mut self, shutdown: CancellationToken) {
        if let Some(raw_rx) = self.battery_raw_rx.take() {
            let coalescer = Coalescer::new(self.settings.coalesce_window);
            tokio::spawn(coalescer.run(raw_rx, self.coalesced_tx.clone()));
        }

        info!("Arbitration engine started");
        self.publish();

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    info!("Arbitration engine stopping");
                    break;
                }
                Some(update) = self.playback_rx.recv() => self.on_playback(update),
                Some(event) = self.coalesced_rx.recv() => self.on_battery(&event),
                Some(record) = self.bluetooth_rx.recv() => self.on_bluetooth(record),
                Some(transition) = self.lock_rx.recv() => self.on_lock(transition),
                Some(command) = self.command_rx.recv() => self.on_command(command),
                Some(fired) = self.timer_rx.recv() => self.on_timer(fired),
                Some(outcome) = self.lookup_rx.recv() => self.on_lookup(outcome),
            }

            self.publish();
        }
    }

    fn on_playback(&mut self, update: PlaybackUpdate) {
        match update {
            PlaybackUpdate::Snapshot(source, snapshot) => {
                trace!("Snapshot from {}: playing={}", source.as_str(), snapshot.is_playing);
                self.table.update(source, snapshot, Instant::now());
            }
            PlaybackUpdate::SourceDown(source) => {
                info!("Source torn down: {}", source.as_str());
                self.table.remove(source);
            }
        }
        self.reselect();
    }

    /// Re-run selection and, on a switch, rebind the controller capability
    /// flags in the same step.
    fn reselect(&mut self) {
        let chosen = select_active(self.mode, &self.table);
        if chosen == self.active {
            return;
        }

        let caps = chosen
            .and_then(|source| self.controllers.get(&source))
            .map(|controller| SourceCaps {
                supports_volume: controller.supports_volume(),
                supports_favorite: controller.supports_favorite(),
            })
            .unwrap_or_default();

        info!(
            "Active source: {} -> {}",
            self.active.map_or("none", SourceKind::as_str),
            chosen.map_or("none", SourceKind::as_str),
        );
        self.active = chosen;
        self.caps = caps;
    }

    fn on_battery(&mut self, event: &BatteryEvent) {
        if let BatteryEvent::Error { reason } = event {
            // Converted to the neutral default at the provider boundary;
            // nothing to display.
            warn!("Battery provider error: {}", reason);
            return;
        }

        self.battery.apply(event);
        self.battery_popup = true;

        let tx = self.timer_tx.clone();
        self.battery_popup_timer
            .arm(self.settings.battery_popup_lifetime, move || {
                let _ = tx.send(TimerFired::BatteryPopupExpired);
            });
    }

    fn on_bluetooth(&mut self, record: BluetoothConnectionRecord) {
        let Some(kind) = self.classifier.classify(&record) else {
            // Unclassifiable is a normal outcome, never a placeholder popup.
            return;
        };

        if !self
            .connect_debouncer
            .accept(kind, &record.address, Instant::now())
        {
            return;
        }

        info!("Bluetooth device connected: {} ({})", record.name, kind.as_str());
        self.bluetooth_popup = Some(BluetoothPopup {
            kind,
            name: record.name.clone(),
            address: record.address.clone(),
            battery_percent: None,
        });

        let tx = self.timer_tx.clone();
        self.bluetooth_popup_timer
            .arm(self.settings.bluetooth_popup_lifetime, move || {
                let _ = tx.send(TimerFired::BluetoothPopupExpired);
            });

        let token = self.ledger.issue(record.address.clone());
        spawn_battery_lookup(
            self.battery_lookup.clone(),
            record.address,
            record.name,
            token,
            self.lookup_tx.clone(),
        );
    }

    fn on_lookup(&mut self, outcome: LookupOutcome) {
        if !self.ledger.is_current(&outcome.address, outcome.token) {
            trace!("Discarding superseded battery lookup for {}", outcome.address);
            return;
        }

        if let Some(popup) = &mut self.bluetooth_popup
            && popup.address == outcome.address
        {
            popup.battery_percent = Some(outcome.percent);
        }
    }

    fn on_lock(&mut self, transition: LockTransition) {
        match transition {
            LockTransition::Locked => {
                self.locked = true;
                self.unlock_settle_timer.cancel();
                self.gate.on_lock();
            }
            LockTransition::Unlocked => {
                self.locked = false;
                self.gate.on_unlock_begin(Instant::now());

                // Safety net: the gate must never remain stuck set.
                if let Some(deadline) = self.gate.deadline() {
                    let tx = self.timer_tx.clone();
                    self.unlock_settle_timer
                        .arm(deadline.saturating_duration_since(Instant::now()), move || {
                            let _ = tx.send(TimerFired::UnlockSettleTimedOut);
                        });
                }
            }
        }
    }

    fn on_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::SetSelectionMode { mode } => {
                if mode != self.mode {
                    info!("Selection mode changed: {mode:?}");
                    self.mode = mode;
                    self.reselect();
                }
            }
            EngineCommand::SetInlineHud { active } => self.signals.inline_hud = active,
            EngineCommand::SetLockIcon { visible } => self.signals.lock_icon = visible,
            EngineCommand::SetTimers {
                running,
                visible_height,
            } => {
                self.signals.timers_running = running;
                self.signals.timer_height = visible_height;
            }
            EngineCommand::SetFileTray { files, expanding } => {
                self.signals.tray_files = files;
                self.signals.tray_expanding = expanding;
            }
            EngineCommand::UnlockPresentationDone => {
                self.unlock_settle_timer.cancel();
                self.gate.on_unlock_settled();
            }
            EngineCommand::Media(media) => self.dispatch_media(media),
        }
    }

    /// Route a playback command to the active source's controller,
    /// fire-and-forget. The loop never waits on a controller.
    fn dispatch_media(&self, command: MediaCommand) {
        let Some(source) = self.active else {
            debug!("Ignoring media command with no active source: {command:?}");
            return;
        };
        let Some(controller) = self.controllers.get(&source).cloned() else {
            debug!("No controller registered for {}", source.as_str());
            return;
        };

        match command {
            MediaCommand::SetVolume { .. } if !self.caps.supports_volume => {
                debug!("Active source does not support volume control");
                return;
            }
            MediaCommand::SetFavorite { .. } if !self.caps.supports_favorite => {
                debug!("Active source does not support favorites");
                return;
            }
            _ => {}
        }

        tokio::spawn(async move {
            match command {
                MediaCommand::Play => controller.play().await,
                MediaCommand::Pause => controller.pause().await,
                MediaCommand::Next => controller.next().await,
                MediaCommand::Previous => controller.previous().await,
                MediaCommand::Seek { position_secs } => controller.seek(position_secs).await,
                MediaCommand::SetVolume { volume } => controller.set_volume(volume).await,
                MediaCommand::SetFavorite { favorite } => controller.set_favorite(favorite).await,
                MediaCommand::ToggleShuffle => controller.toggle_shuffle().await,
                MediaCommand::CycleRepeat => controller.cycle_repeat().await,
            }
        });
    }

    fn on_timer(&mut self, fired: TimerFired) {
        match fired {
            TimerFired::BatteryPopupExpired => self.battery_popup = false,
            TimerFired::BluetoothPopupExpired => self.bluetooth_popup = None,
            TimerFired::IdleQuietPeriodElapsed => self.idle = true,
            TimerFired::UnlockSettleTimedOut => self.gate.expire(Instant::now()),
        }
    }

    /// Recompute the display decision and publish every state group whose
    /// value changed.
    fn publish(&mut self) {
        let active_media = self.active.and_then(|source| {
            self.table.snapshot(source).map(|snapshot| {
                let mut snapshot = snapshot.clone();
                if snapshot.artwork.as_ref().is_none_or(|a| a.is_empty()) {
                    snapshot.artwork = effective_artwork(source, &self.table).map(<[u8]>::to_vec);
                }
                ActiveMedia {
                    source,
                    caps: self.caps,
                    snapshot,
                }
            })
        });

        let music_active = active_media
            .as_ref()
            .is_some_and(|media| media.snapshot.is_playing);

        let inputs = SlotInputs {
            battery_popup: self.battery_popup,
            lock_icon: self.signals.lock_icon,
            inline_hud: self.signals.inline_hud,
            bluetooth_popup: self.bluetooth_popup.is_some(),
            timers_running: self.signals.timers_running,
            timer_height: self.signals.timer_height,
            tray_files: self.signals.tray_files,
            tray_expanding: self.signals.tray_expanding,
            music_active,
            idle: self.idle,
        };
        let decision = compose(&inputs, &self.settings.toggles, self.gate.is_suppressed());

        // An empty strip arms the quiet-period timer; any non-face activity
        // resets it. The gate holding the strip empty does not count as
        // quiet.
        match decision.primary {
            None if !self.gate.is_suppressed() => {
                if !self.idle && !self.idle_timer.is_armed() {
                    let tx = self.timer_tx.clone();
                    self.idle_timer.arm(self.settings.idle_quiet_period, move || {
                        let _ = tx.send(TimerFired::IdleQuietPeriodElapsed);
                    });
                }
            }
            Some(SlotActivity::Face) | None => {}
            Some(_) => {
                self.idle = false;
                self.idle_timer.cancel();
            }
        }

        if update_watch(&self.decision_tx, decision) {
            debug!(
                "Display decision: primary={:?} secondary={:?}",
                decision.primary.map(SlotActivity::as_str),
                decision.secondary.map(SlotActivity::as_str),
            );
        }
        update_watch(&self.playback_tx, active_media);
        update_watch(&self.battery_tx, self.battery);
        update_watch(&self.bluetooth_tx, self.bluetooth_popup.clone());
        update_watch(&self.locked_tx, self.locked);
    }
}

/// Store `value` and notify watchers only when it differs.
fn update_watch<T: PartialEq>(tx: &watch::Sender<T>, value: T) -> bool {
    tx.send_if_modified(|current| {
        if *current == value {
            false
        } else {
            *current = value;
            true
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::NoAccessoryBattery;
    use crate::provider::StaticBatteryLevels;
    use async_trait::async_trait;
    use tokio::time::advance;
    use tokio::time::sleep;

    struct TestController {
        volume: bool,
        favorite: bool,
    }

    #[async_trait]
    impl MediaController for TestController {
        async fn play(&self) {}
        async fn pause(&self) {}
        async fn next(&self) {}
        async fn previous(&self) {}
        async fn seek(&self, _position_secs: f64) {}
        async fn set_volume(&self, _volume: f64) {}
        async fn set_favorite(&self, _favorite: bool) {}
        async fn toggle_shuffle(&self) {}
        async fn cycle_repeat(&self) {}

        fn supports_volume(&self) -> bool {
            self.volume
        }
        fn supports_favorite(&self) -> bool {
            self.favorite
        }
    }

    fn playing(is_playing: bool) -> PlaybackSnapshot {
        PlaybackSnapshot {
            is_playing,
            title: "Track".to_string(),
            ..Default::default()
        }
    }

    /// Let the engine drain its channels; in paused mode the sleep fires
    /// only once every task is idle.
    async fn settle() {
        sleep(Duration::from_millis(1)).await;
    }

    fn start(
        config: &Config,
        lookup: Arc<dyn AccessoryBatteryLookup>,
    ) -> (ProviderChannels, EngineOutputs, CancellationToken) {
        let (mut engine, channels, outputs) = Engine::new(config, lookup);
        engine.register_controller(
            SourceKind::Music,
            Arc::new(TestController {
                volume: true,
                favorite: true,
            }),
        );
        engine.register_controller(
            SourceKind::Spotify,
            Arc::new(TestController {
                volume: true,
                favorite: false,
            }),
        );

        let token = CancellationToken::new();
        tokio::spawn(engine.run(token.clone()));
        (channels, outputs, token)
    }

    #[tokio::test(start_paused = true)]
    async fn test_music_drives_primary_slot() {
        let config = Config::default();
        let (channels, outputs, _token) = start(&config, Arc::new(NoAccessoryBattery));

        channels
            .playback
            .send(PlaybackUpdate::Snapshot(SourceKind::Spotify, playing(true)))
            .await
            .unwrap();
        settle().await;

        assert_eq!(outputs.primary_slot(), Some(SlotActivity::Music));
        let media = outputs.active_media().unwrap();
        assert_eq!(media.source, SourceKind::Spotify);
    }

    #[tokio::test(start_paused = true)]
    async fn test_battery_popup_overrides_music_then_expires() {
        let config = Config::default();
        let (channels, outputs, _token) = start(&config, Arc::new(NoAccessoryBattery));

        channels
            .playback
            .send(PlaybackUpdate::Snapshot(SourceKind::Music, playing(true)))
            .await
            .unwrap();
        channels
            .battery
            .send(BatteryEvent::LevelChanged { percent: 20 })
            .await
            .unwrap();

        // The coalescing window must pass before anything is delivered.
        settle().await;
        assert_eq!(outputs.primary_slot(), Some(SlotActivity::Music));

        advance(Duration::from_millis(150)).await;
        settle().await;
        assert_eq!(outputs.primary_slot(), Some(SlotActivity::Battery));
        assert_eq!(outputs.secondary_slot(), Some(SlotActivity::Music));
        assert_eq!(outputs.battery.borrow().level_percent, 20);

        // The popup expires and music takes the slot back.
        advance(Duration::from_secs(config.battery_popup_seconds + 1)).await;
        settle().await;
        assert_eq!(outputs.primary_slot(), Some(SlotActivity::Music));
        assert_eq!(outputs.secondary_slot(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_suppresses_until_unlock_settles() {
        let config = Config::default();
        let (channels, outputs, _token) = start(&config, Arc::new(NoAccessoryBattery));

        channels
            .playback
            .send(PlaybackUpdate::Snapshot(SourceKind::Music, playing(true)))
            .await
            .unwrap();
        settle().await;
        assert_eq!(outputs.primary_slot(), Some(SlotActivity::Music));

        channels.lock.send(LockTransition::Locked).await.unwrap();
        settle().await;
        assert_eq!(outputs.primary_slot(), None);
        assert!(*outputs.locked.borrow());

        // Unlock begins; the gate stays held.
        channels.lock.send(LockTransition::Unlocked).await.unwrap();
        settle().await;
        assert_eq!(outputs.primary_slot(), None);
        assert!(!*outputs.locked.borrow());

        // The presentation sequence reports completion.
        channels
            .command
            .send(EngineCommand::UnlockPresentationDone)
            .await
            .unwrap();
        settle().await;
        assert_eq!(outputs.primary_slot(), Some(SlotActivity::Music));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_timeout_safety_net() {
        let config = Config::default();
        let (channels, outputs, _token) = start(&config, Arc::new(NoAccessoryBattery));

        channels
            .playback
            .send(PlaybackUpdate::Snapshot(SourceKind::Music, playing(true)))
            .await
            .unwrap();
        channels.lock.send(LockTransition::Locked).await.unwrap();
        channels.lock.send(LockTransition::Unlocked).await.unwrap();
        settle().await;
        assert_eq!(outputs.primary_slot(), None);

        // No completion ever arrives; the timeout clears the gate.
        advance(Duration::from_millis(config.unlock_settle_timeout_ms + 100)).await;
        settle().await;
        assert_eq!(outputs.primary_slot(), Some(SlotActivity::Music));
    }

    #[tokio::test(start_paused = true)]
    async fn test_capability_flags_rebind_on_switch() {
        let config = Config::default();
        let (channels, outputs, _token) = start(&config, Arc::new(NoAccessoryBattery));

        channels
            .playback
            .send(PlaybackUpdate::Snapshot(SourceKind::Music, playing(true)))
            .await
            .unwrap();
        settle().await;
        let media = outputs.active_media().unwrap();
        assert_eq!(media.source, SourceKind::Music);
        assert!(media.caps.supports_favorite);

        // Spotify starts playing later and wins the arbitration.
        advance(Duration::from_millis(10)).await;
        channels
            .playback
            .send(PlaybackUpdate::Snapshot(SourceKind::Spotify, playing(true)))
            .await
            .unwrap();
        settle().await;
        let media = outputs.active_media().unwrap();
        assert_eq!(media.source, SourceKind::Spotify);
        assert!(media.caps.supports_volume);
        assert!(!media.caps.supports_favorite);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mode_change_reselects() {
        let config = Config::default();
        let (channels, outputs, _token) = start(&config, Arc::new(NoAccessoryBattery));

        channels
            .playback
            .send(PlaybackUpdate::Snapshot(SourceKind::System, playing(true)))
            .await
            .unwrap();
        advance(Duration::from_millis(10)).await;
        channels
            .playback
            .send(PlaybackUpdate::Snapshot(SourceKind::Music, playing(true)))
            .await
            .unwrap();
        settle().await;
        assert_eq!(outputs.active_media().unwrap().source, SourceKind::System);

        channels
            .command
            .send(EngineCommand::SetSelectionMode {
                mode: SelectionMode::MusicOnly,
            })
            .await
            .unwrap();
        settle().await;
        assert_eq!(outputs.active_media().unwrap().source, SourceKind::Music);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bluetooth_popup_with_battery_lookup() {
        let config = Config::default();
        let mut levels = HashMap::new();
        levels.insert("aa:bb:cc:dd:ee:ff".to_string(), 85);
        let (channels, outputs, _token) =
            start(&config, Arc::new(StaticBatteryLevels::new(levels)));

        channels
            .bluetooth
            .send(BluetoothConnectionRecord {
                name: "AirPods Pro".to_string(),
                address: "aa:bb:cc:dd:ee:ff".to_string(),
                class_of_device: 0x04 << 8,
                vendor_id: Some(0x004C),
                product_id: Some(0x2014),
            })
            .await
            .unwrap();
        settle().await;

        assert_eq!(outputs.primary_slot(), Some(SlotActivity::Bluetooth));
        let popup = outputs.bluetooth.borrow().clone().unwrap();
        assert_eq!(popup.kind, DeviceKind::AirPodsPro);
        assert_eq!(popup.battery_percent, Some(85));

        // The popup closes after its lifetime.
        advance(Duration::from_secs(config.bluetooth_popup_seconds + 1)).await;
        settle().await;
        assert_eq!(outputs.primary_slot(), None);
        assert!(outputs.bluetooth.borrow().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_connect_suppressed() {
        let config = Config::default();
        let (channels, outputs, _token) = start(&config, Arc::new(NoAccessoryBattery));

        let record = BluetoothConnectionRecord {
            name: "AirPods".to_string(),
            address: "aa:bb:cc:dd:ee:ff".to_string(),
            class_of_device: 0,
            vendor_id: None,
            product_id: None,
        };

        channels.bluetooth.send(record.clone()).await.unwrap();
        settle().await;
        assert!(outputs.bluetooth.borrow().is_some());

        // The popup expires, then a duplicate notification arrives inside
        // the refractory interval: no new popup.
        advance(Duration::from_millis(200)).await;
        channels
            .command
            .send(EngineCommand::SetFileTray {
                files: 0,
                expanding: false,
            })
            .await
            .unwrap();
        settle().await;

        channels.bluetooth.send(record).await.unwrap();
        settle().await;

        // Still the original popup (same value), and only one lookup was
        // ever issued: the popup keeps its original open deadline, so it
        // closes at the original lifetime.
        advance(Duration::from_secs(config.bluetooth_popup_seconds)).await;
        settle().await;
        assert!(outputs.bluetooth.borrow().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_face_after_quiet_period() {
        let config = Config::default();
        let (channels, outputs, _token) = start(&config, Arc::new(NoAccessoryBattery));

        settle().await;
        assert_eq!(outputs.primary_slot(), None);

        advance(Duration::from_secs(config.idle_face_delay_seconds + 1)).await;
        settle().await;
        assert_eq!(outputs.primary_slot(), Some(SlotActivity::Face));

        // Activity resets the face.
        channels
            .playback
            .send(PlaybackUpdate::Snapshot(SourceKind::Music, playing(true)))
            .await
            .unwrap();
        settle().await;
        assert_eq!(outputs.primary_slot(), Some(SlotActivity::Music));
    }
}
