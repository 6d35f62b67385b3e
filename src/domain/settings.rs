use crate::domain::models::ChannelKind;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "wearable_session".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// Automatic reconnection budget after an unexpected link drop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectSettings {
    #[serde(default = "default_reconnect_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_reconnect_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_reconnect_max_attempts(),
            base_delay_ms: default_reconnect_base_delay_ms(),
            max_delay_ms: default_reconnect_max_delay_ms(),
            attempt_timeout_ms: default_reconnect_attempt_timeout_ms(),
        }
    }
}

fn default_reconnect_max_attempts() -> u32 {
    3
}
fn default_reconnect_base_delay_ms() -> u64 {
    1000
}
fn default_reconnect_max_delay_ms() -> u64 {
    8000
}
fn default_reconnect_attempt_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSettings {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_scan_duration_ms")]
    pub scan_duration_ms: u64,
    #[serde(default)]
    pub reconnect: ReconnectSettings,
    // Channels the wearable must expose for the integration to be usable
    #[serde(default = "default_required_channels")]
    pub required_channels: Vec<ChannelKind>,
    #[serde(default = "default_subscriber_queue_capacity")]
    pub subscriber_queue_capacity: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            scan_duration_ms: default_scan_duration_ms(),
            reconnect: ReconnectSettings::default(),
            required_channels: default_required_channels(),
            subscriber_queue_capacity: default_subscriber_queue_capacity(),
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_scan_duration_ms() -> u64 {
    5000
}
fn default_required_channels() -> Vec<ChannelKind> {
    vec![ChannelKind::HeartRate]
}
fn default_subscriber_queue_capacity() -> usize {
    64
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log_settings: LogSettings,

    #[serde(default)]
    pub session: SessionSettings,

    // Wearable preferred on the next launch
    #[serde(default)]
    pub last_connected_peripheral: Option<String>,
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::with_path(settings_path))
    }

    /// Load from an explicit file, falling back to defaults if it is missing or unreadable.
    pub fn with_path(settings_path: PathBuf) -> Self {
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();
        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("WearableSession");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn remember_peripheral(&mut self, id: &str) -> anyhow::Result<()> {
        if self.settings.last_connected_peripheral.as_deref() != Some(id) {
            self.settings.last_connected_peripheral = Some(id.to_string());
            self.save()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_fills_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{ "session": { "connect_timeout_ms": 2500 } }"#).unwrap();
        assert_eq!(settings.session.connect_timeout_ms, 2500);
        assert_eq!(settings.session.reconnect, ReconnectSettings::default());
        assert_eq!(
            settings.session.required_channels,
            vec![ChannelKind::HeartRate]
        );
        assert_eq!(settings.log_settings.level, "info");
    }

    #[test]
    fn test_missing_file_uses_defaults_and_saves() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let mut service = SettingsService::with_path(path.clone());
        assert_eq!(service.get().session, SessionSettings::default());

        service.remember_peripheral("band-a").unwrap();
        let reloaded = SettingsService::with_path(path);
        assert_eq!(
            reloaded.get().last_connected_peripheral.as_deref(),
            Some("band-a")
        );
    }
}
