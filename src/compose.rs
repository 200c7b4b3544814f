//! Display slot composition.
//!
//! Reduces all current boolean/state signals to the single activity that
//! owns the primary display slot, plus an optional compact secondary slot.
//! The function is pure and idempotent: identical inputs always produce the
//! identical decision.

/// A closed-state activity competing for a display slot.
///
/// "Nothing to show" is the absence of a value, not a variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotActivity {
    Battery,
    LockIcon,
    InlineHud,
    Bluetooth,
    Timer,
    FileTray,
    Music,
    Face,
}

impl SlotActivity {
    /// Strict priority order; the first eligible activity wins.
    pub const PRIORITY: [SlotActivity; 8] = [
        SlotActivity::Battery,
        SlotActivity::LockIcon,
        SlotActivity::InlineHud,
        SlotActivity::Bluetooth,
        SlotActivity::Timer,
        SlotActivity::FileTray,
        SlotActivity::Music,
        SlotActivity::Face,
    ];

    /// Get the activity as a string for logging.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Battery => "battery",
            Self::LockIcon => "lock-icon",
            Self::InlineHud => "inline-hud",
            Self::Bluetooth => "bluetooth",
            Self::Timer => "timer",
            Self::FileTray => "file-tray",
            Self::Music => "music",
            Self::Face => "face",
        }
    }
}

/// Current state signals feeding the compositor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlotInputs {
    /// A battery popup window is currently open.
    pub battery_popup: bool,
    /// The lock icon signal is raised.
    pub lock_icon: bool,
    /// A sibling inline HUD (volume/brightness) is showing.
    pub inline_hud: bool,
    /// An accepted Bluetooth connect popup is currently open.
    pub bluetooth_popup: bool,
    /// Number of running timers.
    pub timers_running: usize,
    /// Visible height of the timer indicator; zero hides it.
    pub timer_height: u32,
    /// Number of files in the tray.
    pub tray_files: usize,
    /// The tray is mid-expansion overlay.
    pub tray_expanding: bool,
    /// The active media source is currently playing.
    pub music_active: bool,
    /// The quiet period elapsed with nothing else to show.
    pub idle: bool,
}

/// Per-activity user toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityToggles {
    pub battery: bool,
    pub bluetooth: bool,
    pub timer: bool,
    pub file_tray: bool,
    pub music: bool,
    pub face: bool,
}

impl Default for ActivityToggles {
    fn default() -> Self {
        Self {
            battery: true,
            bluetooth: true,
            timer: true,
            file_tray: true,
            music: true,
            face: true,
        }
    }
}

/// The compositor's output: at most one primary and one compact activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlotDecision {
    pub primary: Option<SlotActivity>,
    pub secondary: Option<SlotActivity>,
}

/// Compute the current display decision.
///
/// With the suppression gate active, both slots are empty regardless of any
/// other input. Otherwise the first eligible activity in priority order
/// wins the primary slot, and the same order is re-run over the remaining
/// activities with relaxed eligibility for the compact slot. Primary and
/// secondary are never equal.
pub fn compose(inputs: &SlotInputs, toggles: &ActivityToggles, gate_suppressed: bool) -> SlotDecision {
    if gate_suppressed {
        return SlotDecision::default();
    }

    let primary = SlotActivity::PRIORITY
        .into_iter()
        .find(|a| primary_eligible(*a, inputs, toggles));

    let secondary = primary.and_then(|winner| {
        SlotActivity::PRIORITY
            .into_iter()
            .filter(|a| *a != winner)
            .find(|a| secondary_eligible(*a, inputs, toggles))
    });

    SlotDecision { primary, secondary }
}

fn primary_eligible(activity: SlotActivity, i: &SlotInputs, t: &ActivityToggles) -> bool {
    match activity {
        SlotActivity::Battery => t.battery && i.battery_popup,
        SlotActivity::LockIcon => i.lock_icon,
        SlotActivity::InlineHud => i.inline_hud,
        SlotActivity::Bluetooth => t.bluetooth && i.bluetooth_popup,
        SlotActivity::Timer => t.timer && i.timers_running > 0 && i.timer_height > 0,
        SlotActivity::FileTray => t.file_tray && i.tray_files > 0 && !i.tray_expanding,
        // The tray supersedes music in the primary slot.
        SlotActivity::Music => t.music && i.music_active && i.tray_files == 0,
        SlotActivity::Face => t.face && i.idle,
    }
}

fn secondary_eligible(activity: SlotActivity, i: &SlotInputs, t: &ActivityToggles) -> bool {
    match activity {
        // Relaxed: music may ride in the compact slot even while the tray
        // holds the primary one.
        SlotActivity::Music => t.music && i.music_active,
        // Whole-strip states never occupy the compact slot.
        SlotActivity::LockIcon | SlotActivity::InlineHud | SlotActivity::Face => false,
        _ => primary_eligible(activity, i, t),
    }
}
