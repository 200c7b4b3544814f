//! Bluetooth device classification.
//!
//! Turns a raw connection record into a recognized device bucket, or into
//! nothing at all: an unclassifiable device must never produce a popup.
//! Classification is a pure function of the record; the refractory tracker
//! that absorbs duplicate OS notifications lives alongside it.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;
use tracing::trace;

/// Raw Bluetooth connection record as handed over by the OS provider.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BluetoothConnectionRecord {
    pub name: String,
    pub address: String,
    /// Raw class-of-device bits (major class in bits 12..8, minor in 7..2).
    #[serde(default)]
    pub class_of_device: u32,
    #[serde(default)]
    pub vendor_id: Option<u16>,
    #[serde(default)]
    pub product_id: Option<u16>,
}

/// Recognized device buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    AirPods,
    AirPodsPro,
    AirPodsMax,
    Audio,
    Keyboard,
    Mouse,
    Combo,
    Computer,
    Phone,
    Gamepad,
    DualSense,
    Other,
}

impl DeviceKind {
    /// Get the kind as a string for logging.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AirPods => "airpods",
            Self::AirPodsPro => "airpods-pro",
            Self::AirPodsMax => "airpods-max",
            Self::Audio => "audio",
            Self::Keyboard => "keyboard",
            Self::Mouse => "mouse",
            Self::Combo => "combo",
            Self::Computer => "computer",
            Self::Phone => "phone",
            Self::Gamepad => "gamepad",
            Self::DualSense => "dualsense",
            Self::Other => "other",
        }
    }
}

const APPLE_VENDOR: u16 = 0x004C;
const SONY_VENDOR: u16 = 0x054C;

/// Exact vendor/product matches, highest confidence.
const VENDOR_PRODUCT_TABLE: &[(u16, u16, DeviceKind)] = &[
    (APPLE_VENDOR, 0x2002, DeviceKind::AirPods),
    (APPLE_VENDOR, 0x200F, DeviceKind::AirPods),
    (APPLE_VENDOR, 0x2013, DeviceKind::AirPods),
    (APPLE_VENDOR, 0x200E, DeviceKind::AirPodsPro),
    (APPLE_VENDOR, 0x2014, DeviceKind::AirPodsPro),
    (APPLE_VENDOR, 0x200A, DeviceKind::AirPodsMax),
    (SONY_VENDOR, 0x0CE6, DeviceKind::DualSense),
    (SONY_VENDOR, 0x0DF2, DeviceKind::DualSense),
];

/// Case-insensitive name substrings, medium confidence. First match wins,
/// so more specific tokens come first. Some tokens are deliberately loose:
/// Sony and Beats headsets advertise bare model codes, not marketing names.
const NAME_TOKEN_TABLE: &[(&str, DeviceKind)] = &[
    ("airpods pro", DeviceKind::AirPodsPro),
    ("airpods max", DeviceKind::AirPodsMax),
    ("airpods", DeviceKind::AirPods),
    ("dualsense", DeviceKind::DualSense),
    ("dualshock", DeviceKind::Gamepad),
    ("xbox", DeviceKind::Gamepad),
    ("joy-con", DeviceKind::Gamepad),
    ("pro controller", DeviceKind::Gamepad),
    ("magic keyboard", DeviceKind::Keyboard),
    ("magic mouse", DeviceKind::Mouse),
    ("magic trackpad", DeviceKind::Mouse),
    ("beats", DeviceKind::Audio),
    ("buds", DeviceKind::Audio),
    ("wh-10", DeviceKind::Audio),
    ("wf-10", DeviceKind::Audio),
    ("soundcore", DeviceKind::Audio),
    ("headphones", DeviceKind::Audio),
    ("earbuds", DeviceKind::Audio),
    ("speaker", DeviceKind::Audio),
];

/// Names that must never classify, regardless of what their class-of-device
/// bits say: continuity/handoff companion devices and placeholder names.
const DENY_TOKENS: &[&str] = &[
    "iphone",
    "ipad",
    "apple watch",
    "macbook",
    "imac",
    "mac mini",
    "mac studio",
    "mac pro",
    "apple tv",
    "unknown",
    "accessory",
];

/// Device classifier with a configurable extra deny-list.
#[derive(Debug, Default)]
pub struct Classifier {
    extra_deny: Vec<String>,
}

impl Classifier {
    /// Create a classifier with extra deny tokens from configuration.
    pub fn new(extra_deny: Vec<String>) -> Self {
        let extra_deny = extra_deny.into_iter().map(|t| t.to_lowercase()).collect();
        Self { extra_deny }
    }

    /// Classify a connection record.
    ///
    /// Returns `None` for denied and unclassifiable devices; the caller
    /// must suppress display in that case rather than show a placeholder.
    pub fn classify(&self, record: &BluetoothConnectionRecord) -> Option<DeviceKind> {
        if self.is_denied(&record.name) {
            trace!("Denied device name: {:?}", record.name);
            return None;
        }

        if let Some(kind) = match_vendor_product(record) {
            debug!(
                "Classified {:?} by vendor/product id: {}",
                record.name,
                kind.as_str()
            );
            return Some(kind);
        }

        if let Some(kind) = match_name_token(&record.name) {
            debug!("Classified {:?} by name token: {}", record.name, kind.as_str());
            return Some(kind);
        }

        if let Some(kind) = decode_class_of_device(record.class_of_device) {
            debug!(
                "Classified {:?} by class-of-device bits: {}",
                record.name,
                kind.as_str()
            );
            return Some(kind);
        }

        trace!("Unclassifiable device: {:?}", record.name);
        None
    }

    /// Pre-filter applied before any classification stage runs.
    fn is_denied(&self, name: &str) -> bool {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return true;
        }

        let lower = trimmed.to_lowercase();
        DENY_TOKENS.iter().any(|t| lower.contains(t))
            || self.extra_deny.iter().any(|t| lower.contains(t.as_str()))
    }
}

/// Stage 1: exact vendor/product-id match.
fn match_vendor_product(record: &BluetoothConnectionRecord) -> Option<DeviceKind> {
    let (Some(vendor), Some(product)) = (record.vendor_id, record.product_id) else {
        return None;
    };

    VENDOR_PRODUCT_TABLE
        .iter()
        .find(|(v, p, _)| *v == vendor && *p == product)
        .map(|(_, _, kind)| *kind)
}

/// Stage 2: case-insensitive name substring heuristics.
fn match_name_token(name: &str) -> Option<DeviceKind> {
    let lower = name.to_lowercase();
    NAME_TOKEN_TABLE
        .iter()
        .find(|(token, _)| lower.contains(token))
        .map(|(_, kind)| *kind)
}

/// Stage 3: class-of-device major/minor decoding for generic categories.
fn decode_class_of_device(cod: u32) -> Option<DeviceKind> {
    const MAJOR_COMPUTER: u32 = 0x01;
    const MAJOR_PHONE: u32 = 0x02;
    const MAJOR_AUDIO_VIDEO: u32 = 0x04;
    const MAJOR_PERIPHERAL: u32 = 0x05;

    let major = (cod >> 8) & 0x1F;
    match major {
        MAJOR_COMPUTER => Some(DeviceKind::Computer),
        MAJOR_PHONE => Some(DeviceKind::Phone),
        MAJOR_AUDIO_VIDEO => Some(DeviceKind::Audio),
        MAJOR_PERIPHERAL => {
            // Bits 6/7 of the CoD carry the keyboard/pointing flags; the
            // minor class below them distinguishes joysticks and gamepads.
            let keyboard = cod & 0x40 != 0;
            let pointing = cod & 0x80 != 0;
            match (keyboard, pointing) {
                (true, true) => Some(DeviceKind::Combo),
                (true, false) => Some(DeviceKind::Keyboard),
                (false, true) => Some(DeviceKind::Mouse),
                (false, false) => {
                    let minor = (cod >> 2) & 0x0F;
                    if minor == 0x01 || minor == 0x02 {
                        Some(DeviceKind::Gamepad)
                    } else {
                        None
                    }
                }
            }
        }
        _ => None,
    }
}

/// Absorbs duplicate connect notifications for the same physical device.
///
/// The OS can deliver the same connect several times in quick succession;
/// an identical (kind, address) pair inside the refractory interval is
/// suppressed. Suppressed repeats do not extend the interval.
#[derive(Debug)]
pub struct ConnectDebouncer {
    refractory: Duration,
    last: Option<(DeviceKind, String, Instant)>,
}

impl ConnectDebouncer {
    /// Create a debouncer with the given refractory interval.
    pub fn new(refractory: Duration) -> Self {
        Self {
            refractory,
            last: None,
        }
    }

    /// Record an accepted classification, or reject an identical repeat.
    pub fn accept(&mut self, kind: DeviceKind, address: &str, now: Instant) -> bool {
        if let Some((last_kind, last_address, at)) = &self.last
            && *last_kind == kind
            && last_address == address
            && now.duration_since(*at) < self.refractory
        {
            debug!("Suppressed duplicate connect for {} ({})", address, kind.as_str());
            return false;
        }

        self.last = Some((kind, address.to_string(), now));
        true
    }
}
