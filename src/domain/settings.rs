use crate::infrastructure::bluetooth::protocol;
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
    "flower_light".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// Characteristic UUIDs as strings; 16-bit SIG short forms like "2a19" are accepted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacteristicSettings {
    #[serde(default = "default_command_uuid")]
    pub command: String,
    #[serde(default = "default_state_uuid")]
    pub state: String,
    #[serde(default = "default_name_uuid")]
    pub name: String,
    #[serde(default = "default_brightness_uuid")]
    pub brightness: String,
    #[serde(default = "default_speed_uuid")]
    pub speed: String,
    #[serde(default = "default_max_open_uuid")]
    pub max_open: String,
    #[serde(default = "default_color_scheme_uuid")]
    pub color_scheme: String,
    #[serde(default = "default_wifi_status_uuid")]
    pub wifi_status: String,
    #[serde(default = "default_battery_uuid")]
    pub battery_level: String,
    #[serde(default = "default_battery_power_state_uuid")]
    pub battery_power_state: String,
    #[serde(default = "default_model_uuid")]
    pub model: String,
    #[serde(default = "default_serial_uuid")]
    pub serial: String,
    #[serde(default = "default_firmware_uuid")]
    pub firmware: String,
    #[serde(default = "default_hardware_uuid")]
    pub hardware: String,
    #[serde(default = "default_manufacturer_uuid")]
    pub manufacturer: String,
}

impl Default for CharacteristicSettings {
    fn default() -> Self {
        Self {
            command: default_command_uuid(),
            state: default_state_uuid(),
            name: default_name_uuid(),
            brightness: default_brightness_uuid(),
            speed: default_speed_uuid(),
            max_open: default_max_open_uuid(),
            color_scheme: default_color_scheme_uuid(),
            wifi_status: default_wifi_status_uuid(),
            battery_level: default_battery_uuid(),
            battery_power_state: default_battery_power_state_uuid(),
            model: default_model_uuid(),
            serial: default_serial_uuid(),
            firmware: default_firmware_uuid(),
            hardware: default_hardware_uuid(),
            manufacturer: default_manufacturer_uuid(),
        }
    }
}

fn default_command_uuid() -> String {
    protocol::COMMAND_CHAR.to_string()
}
fn default_state_uuid() -> String {
    protocol::STATE_CHAR.to_string()
}
fn default_name_uuid() -> String {
    protocol::NAME_CHAR.to_string()
}
fn default_brightness_uuid() -> String {
    protocol::BRIGHTNESS_CHAR.to_string()
}
fn default_speed_uuid() -> String {
    protocol::SPEED_CHAR.to_string()
}
fn default_max_open_uuid() -> String {
    protocol::MAX_OPEN_CHAR.to_string()
}
fn default_color_scheme_uuid() -> String {
    protocol::COLOR_SCHEME_CHAR.to_string()
}
fn default_wifi_status_uuid() -> String {
    protocol::WIFI_STATUS_CHAR.to_string()
}
fn default_battery_uuid() -> String {
    protocol::BATTERY_LEVEL_CHAR.to_string()
}
fn default_battery_power_state_uuid() -> String {
    protocol::BATTERY_POWER_STATE_CHAR.to_string()
}
fn default_model_uuid() -> String {
    protocol::MODEL_CHAR.to_string()
}
fn default_serial_uuid() -> String {
    protocol::SERIAL_CHAR.to_string()
}
fn default_firmware_uuid() -> String {
    protocol::FIRMWARE_CHAR.to_string()
}
fn default_hardware_uuid() -> String {
    protocol::HARDWARE_CHAR.to_string()
}
fn default_manufacturer_uuid() -> String {
    protocol::MANUFACTURER_CHAR.to_string()
}

/// Firmware command type codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandCodes {
    #[serde(default = "default_write_petals")]
    pub write_petals: u16,
    #[serde(default = "default_write_rgb_color")]
    pub write_rgb_color: u16,
    #[serde(default = "default_write_state")]
    pub write_state: u16,
    #[serde(default = "default_play_animation")]
    pub play_animation: u16,
    #[serde(default = "default_write_name")]
    pub write_name: u16,
    #[serde(default = "default_write_customization")]
    pub write_customization: u16,
    #[serde(default = "default_write_color_scheme")]
    pub write_color_scheme: u16,
}

impl Default for CommandCodes {
    fn default() -> Self {
        Self {
            write_petals: default_write_petals(),
            write_rgb_color: default_write_rgb_color(),
            write_state: default_write_state(),
            play_animation: default_play_animation(),
            write_name: default_write_name(),
            write_customization: default_write_customization(),
            write_color_scheme: default_write_color_scheme(),
        }
    }
}

fn default_write_petals() -> u16 {
    64
}
fn default_write_rgb_color() -> u16 {
    65
}
fn default_write_state() -> u16 {
    67
}
fn default_play_animation() -> u16 {
    69
}
fn default_write_name() -> u16 {
    74
}
fn default_write_customization() -> u16 {
    75
}
fn default_write_color_scheme() -> u16 {
    77
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingSettings {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,
    /// Pause after the link comes up before any characteristic I/O
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_transition_ms")]
    pub default_transition_ms: u32,

    // Platform transport retry behaviour
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    #[serde(default = "default_connect_retry_delay_ms")]
    pub connect_retry_delay_ms: u64,
    #[serde(default = "default_scan_timeout_ms")]
    pub scan_timeout_ms: u64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            io_timeout_ms: default_io_timeout_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            default_transition_ms: default_transition_ms(),
            connect_attempts: default_connect_attempts(),
            connect_retry_delay_ms: default_connect_retry_delay_ms(),
            scan_timeout_ms: default_scan_timeout_ms(),
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    30_000
}
fn default_io_timeout_ms() -> u64 {
    10_000
}
fn default_settle_delay_ms() -> u64 {
    500
}
fn default_transition_ms() -> u32 {
    1000
}
fn default_connect_attempts() -> u32 {
    3
}
fn default_connect_retry_delay_ms() -> u64 {
    1000
}
fn default_scan_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceSettings {
    #[serde(default)]
    pub known_addresses: Vec<String>,
    #[serde(default)]
    pub last_connected_address: Option<String>,
    #[serde(default)]
    pub name_hint: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BleSettings {
    #[serde(default)]
    pub characteristics: CharacteristicSettings,
    #[serde(default)]
    pub commands: CommandCodes,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log_settings: LogSettings,
    #[serde(default)]
    pub device: DeviceSettings,
    #[serde(default)]
    pub ble: BleSettings,
    #[serde(default)]
    pub timing: TimingSettings,
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

    /// Load from an explicit file, falling back to defaults when it is missing or invalid
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
        path.push("FlowerLight");
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

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn add_known_address(&mut self, address: &str) -> anyhow::Result<()> {
        if !self
            .settings
            .device
            .known_addresses
            .iter()
            .any(|known| known.eq_ignore_ascii_case(address))
        {
            self.settings.device.known_addresses.push(address.to_string());
        }
        self.settings.device.last_connected_address = Some(address.to_string());
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{
            "timing": { "settle_delay_ms": 250 },
            "ble": { "commands": { "write_state": 99 } }
        }"#;
        let settings: Settings = serde_json::from_str(json).unwrap();

        assert_eq!(settings.timing.settle_delay_ms, 250);
        assert_eq!(settings.timing.default_transition_ms, 1000);
        assert_eq!(settings.ble.commands.write_state, 99);
        assert_eq!(settings.ble.commands.write_petals, 64);
        assert_eq!(settings.ble.commands.write_color_scheme, 77);
        assert_eq!(
            settings.ble.characteristics.battery_power_state,
            protocol::BATTERY_POWER_STATE_CHAR.to_string()
        );
        assert_eq!(
            settings.ble.characteristics.command,
            protocol::COMMAND_CHAR.to_string()
        );
        assert_eq!(settings.log_settings.level, "info");
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let service = SettingsService::with_path(dir.path().join("absent.json"));
        assert_eq!(service.get().ble.commands, CommandCodes::default());
        assert!(service.get().device.known_addresses.is_empty());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let mut service = SettingsService::with_path(path.clone());
        service.get_mut().device.name_hint = Some("Desk".to_string());
        service.add_known_address("AA:BB:CC:DD:EE:FF").unwrap();
        service.add_known_address("aa:bb:cc:dd:ee:ff").unwrap();

        let reloaded = SettingsService::with_path(path);
        let device = &reloaded.get().device;
        assert_eq!(device.known_addresses, vec!["AA:BB:CC:DD:EE:FF".to_string()]);
        assert_eq!(
            device.last_connected_address.as_deref(),
            Some("aa:bb:cc:dd:ee:ff")
        );
        assert_eq!(device.name_hint.as_deref(), Some("Desk"));
    }

    #[test]
    fn test_invalid_json_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();

        let service = SettingsService::with_path(path);
        assert_eq!(service.get().timing.settle_delay_ms, 500);
    }
}
