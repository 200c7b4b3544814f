//! Configuration loading and defaults for glancehud.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use anyhow::Result;
use serde::Deserialize;
use serde::Serialize;

use crate::compose::ActivityToggles;
use crate::select::SelectionMode;

/// Main configuration for glancehud.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Battery event coalescing window in milliseconds (default: 120).
    pub coalesce_window_ms: u64,

    /// Refractory interval for duplicate Bluetooth connects in
    /// milliseconds (default: 1000).
    pub connect_refractory_ms: u64,

    /// How long a battery popup stays open, in seconds (default: 4).
    pub battery_popup_seconds: u64,

    /// How long a Bluetooth connect popup stays open, in seconds
    /// (default: 6).
    pub bluetooth_popup_seconds: u64,

    /// Quiet period before the idle face appears, in seconds
    /// (default: 90).
    pub idle_face_delay_seconds: u64,

    /// Safety-net timeout for the unlock presentation sequence in
    /// milliseconds (default: 2000).
    pub unlock_settle_timeout_ms: u64,

    /// How the active media source is chosen (default: system_wide).
    pub selection_mode: SelectionMode,

    /// Per-activity display toggles.
    pub battery_alerts: bool,
    pub bluetooth_popups: bool,
    pub timers: bool,
    pub file_tray: bool,
    pub music: bool,
    pub idle_face: bool,

    /// Extra device-name tokens to deny, on top of the built-in list.
    pub device_denylist: Vec<String>,

    /// Accessory battery levels by address, used by the replay harness in
    /// place of a live lookup provider.
    pub accessory_battery: HashMap<String, u8>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            coalesce_window_ms: 120,
            connect_refractory_ms: 1000,
            battery_popup_seconds: 4,
            bluetooth_popup_seconds: 6,
            idle_face_delay_seconds: 90,
            unlock_settle_timeout_ms: 2000,
            selection_mode: SelectionMode::SystemWide,
            battery_alerts: true,
            bluetooth_popups: true,
            timers: true,
            file_tray: true,
            music: true,
            idle_face: true,
            device_denylist: Vec::new(),
            accessory_battery: HashMap::new(),
        }
    }
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Load configuration from the default path, or return defaults if not
    /// found.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(p) = path {
            return Self::load(p);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let default_path = config_dir.join("glancehud").join("config.toml");
            if default_path.exists() {
                return Self::load(&default_path);
            }
        }

        Ok(Self::default())
    }

    /// Activity toggles for the compositor.
    pub fn toggles(&self) -> ActivityToggles {
        ActivityToggles {
            battery: self.battery_alerts,
            bluetooth: self.bluetooth_popups,
            timer: self.timers,
            file_tray: self.file_tray,
            music: self.music,
            face: self.idle_face,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.coalesce_window_ms, 120);
        assert_eq!(config.connect_refractory_ms, 1000);
        assert_eq!(config.unlock_settle_timeout_ms, 2000);
        assert_eq!(config.selection_mode, SelectionMode::SystemWide);
        assert!(config.battery_alerts);
        assert!(config.device_denylist.is_empty());
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
            coalesce_window_ms = 200
            battery_popup_seconds = 2
            selection_mode = "music_only"
            bluetooth_popups = false
            device_denylist = ["carplay", "console"]

            [accessory_battery]
            "aa:bb:cc:dd:ee:ff" = 85
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.coalesce_window_ms, 200);
        assert_eq!(config.battery_popup_seconds, 2);
        assert_eq!(config.selection_mode, SelectionMode::MusicOnly);
        assert!(!config.bluetooth_popups);
        assert_eq!(
            config.device_denylist,
            vec!["carplay".to_string(), "console".to_string()]
        );
        assert_eq!(config.accessory_battery.get("aa:bb:cc:dd:ee:ff"), Some(&85));

        // Unset fields keep their defaults.
        assert_eq!(config.connect_refractory_ms, 1000);
        assert!(config.music);
    }

    #[test]
    fn test_toggles_mapping() {
        let config = Config {
            battery_alerts: false,
            idle_face: false,
            ..Default::default()
        };

        let toggles = config.toggles();
        assert!(!toggles.battery);
        assert!(!toggles.face);
        assert!(toggles.bluetooth);
        assert!(toggles.music);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let err = Config::load(Path::new("/nonexistent/glancehud.toml"));
        assert!(err.is_err());
    }

    #[test]
    fn test_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.selection_mode = SelectionMode::MusicOnly;
        config.bluetooth_popup_seconds = 3;
        std::fs::write(&path, toml::to_string(&config).unwrap()).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.selection_mode, SelectionMode::MusicOnly);
        assert_eq!(loaded.bluetooth_popup_seconds, 3);
    }
}
