use crate::infrastructure::bluetooth::protocol::CHARGING_POWER_STATE;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fallback label when neither the caller nor the peer supplies a name
pub const DEFAULT_DISPLAY_NAME: &str = "Flower Light";

/// Clamp an arbitrary integer into the 0-100 percentage range
pub fn clamp_pct(value: i32) -> u8 {
    value.clamp(0, 100) as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const WHITE: Rgb = Rgb::new(255, 255, 255);
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl Default for Rgb {
    fn default() -> Self {
        Self::WHITE
    }
}

impl From<(u8, u8, u8)> for Rgb {
    fn from((r, g, b): (u8, u8, u8)) -> Self {
        Self::new(r, g, b)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerSource {
    Charging,
    Battery,
}

impl PowerSource {
    /// Any byte other than the charger pattern means running on battery
    pub fn from_power_state(byte: u8) -> Self {
        if byte == CHARGING_POWER_STATE {
            Self::Charging
        } else {
            Self::Battery
        }
    }
}

impl fmt::Display for PowerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Charging => write!(f, "charging"),
            Self::Battery => write!(f, "battery"),
        }
    }
}

/// Wi-Fi and cloud link status as reported by the lamp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiStatus {
    Disabled,
    NotConfigured,
    Failed,
    CloudUnauthorized,
    CloudConnected,
    Connecting,
    Unknown(u8),
}

impl WifiStatus {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Disabled,
            1 => Self::NotConfigured,
            2 => Self::Failed,
            3 => Self::CloudUnauthorized,
            4 => Self::CloudConnected,
            5 => Self::Connecting,
            other => Self::Unknown(other),
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            Self::Disabled => 0,
            Self::NotConfigured => 1,
            Self::Failed => 2,
            Self::CloudUnauthorized => 3,
            Self::CloudConnected => 4,
            Self::Connecting => 5,
            Self::Unknown(code) => *code,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Disabled => "Disabled",
            Self::NotConfigured => "Not configured",
            Self::Failed => "Failed",
            Self::CloudUnauthorized => "Floud unauthorized",
            Self::CloudConnected => "Floud connected",
            Self::Connecting => "Connecting",
            Self::Unknown(_) => "Unknown",
        }
    }
}

impl fmt::Display for WifiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label(), self.code())
    }
}

/// Events published to every subscribed observer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Connected,
    /// Emitted once per link loss or explicit disconnect
    Disconnected,
    /// The peer pushed a notification; its bytes are an opaque refresh trigger
    StateChanged { payload: Vec<u8> },
    /// Battery level or power source notification
    BatteryChanged {
        battery_pct: Option<u8>,
        power_source: Option<PowerSource>,
    },
    WifiStatusChanged { status: WifiStatus },
}

/// Local snapshot of everything known about one peer.
///
/// All percentage setters clamp into `[0, 100]`. The connection state is only
/// writable from inside the crate, where the connection manager owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceState {
    address: String,
    display_name: String,
    connection_state: ConnectionState,
    sequence_counter: u16,
    power_on: bool,
    brightness_pct: u8,
    rgb: Rgb,
    petal_position_pct: u8,
    battery_pct: Option<u8>,
    power_source: Option<PowerSource>,
    brightness_config_pct: Option<u8>,
    animation_speed: Option<u8>,
    max_open_pct: Option<u8>,
    color_scheme: Option<Vec<Rgb>>,
    wifi_status: Option<WifiStatus>,
    model: Option<String>,
    manufacturer: Option<String>,
    firmware_version: Option<String>,
    serial_number: Option<String>,
    hardware_revision: Option<String>,
}

impl DeviceState {
    pub fn new(address: impl Into<String>, name_hint: Option<&str>) -> Self {
        let display_name = name_hint
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_DISPLAY_NAME)
            .to_string();

        Self {
            address: address.into(),
            display_name,
            connection_state: ConnectionState::Disconnected,
            sequence_counter: 1,
            power_on: false,
            brightness_pct: 100,
            rgb: Rgb::WHITE,
            petal_position_pct: 0,
            battery_pct: None,
            power_source: None,
            brightness_config_pct: None,
            animation_speed: None,
            max_open_pct: None,
            color_scheme: None,
            wifi_status: None,
            model: None,
            manufacturer: None,
            firmware_version: None,
            serial_number: None,
            hardware_revision: None,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection_state
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state == ConnectionState::Connected
    }

    /// Message id the next packet will carry
    pub fn sequence_counter(&self) -> u16 {
        self.sequence_counter
    }

    pub fn power_on(&self) -> bool {
        self.power_on
    }

    pub fn brightness_pct(&self) -> u8 {
        self.brightness_pct
    }

    pub fn rgb(&self) -> Rgb {
        self.rgb
    }

    pub fn petal_position_pct(&self) -> u8 {
        self.petal_position_pct
    }

    pub fn battery_pct(&self) -> Option<u8> {
        self.battery_pct
    }

    pub fn power_source(&self) -> Option<PowerSource> {
        self.power_source
    }

    pub fn brightness_config_pct(&self) -> Option<u8> {
        self.brightness_config_pct
    }

    pub fn animation_speed(&self) -> Option<u8> {
        self.animation_speed
    }

    pub fn max_open_pct(&self) -> Option<u8> {
        self.max_open_pct
    }

    /// Last scheme read from or written to the lamp, already quantized to hue/saturation
    pub fn color_scheme(&self) -> Option<&[Rgb]> {
        self.color_scheme.as_deref()
    }

    pub fn wifi_status(&self) -> Option<WifiStatus> {
        self.wifi_status
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn manufacturer(&self) -> Option<&str> {
        self.manufacturer.as_deref()
    }

    pub fn firmware_version(&self) -> Option<&str> {
        self.firmware_version.as_deref()
    }

    pub fn serial_number(&self) -> Option<&str> {
        self.serial_number.as_deref()
    }

    pub fn hardware_revision(&self) -> Option<&str> {
        self.hardware_revision.as_deref()
    }

    pub(crate) fn set_connection_state(&mut self, state: ConnectionState) -> ConnectionState {
        std::mem::replace(&mut self.connection_state, state)
    }

    /// Hand out the current message id and advance the counter, wrapping at 65536
    pub(crate) fn issue_message_id(&mut self) -> u16 {
        let id = self.sequence_counter;
        self.sequence_counter = self.sequence_counter.wrapping_add(1);
        id
    }

    /// Empty names are ignored so a blank readback never erases the label
    pub fn set_display_name(&mut self, name: &str) {
        let name = name.trim();
        if !name.is_empty() {
            self.display_name = name.to_string();
        }
    }

    pub fn set_power_on(&mut self, on: bool) {
        self.power_on = on;
    }

    pub fn set_brightness(&mut self, pct: i32) {
        self.brightness_pct = clamp_pct(pct);
    }

    pub fn set_rgb(&mut self, rgb: Rgb) {
        self.rgb = rgb;
    }

    pub fn set_petal_position(&mut self, pct: i32) {
        self.petal_position_pct = clamp_pct(pct);
    }

    pub fn set_battery(&mut self, pct: i32) {
        self.battery_pct = Some(clamp_pct(pct));
    }

    pub fn set_power_source(&mut self, source: PowerSource) {
        self.power_source = Some(source);
    }

    pub fn set_brightness_config(&mut self, pct: i32) {
        self.brightness_config_pct = Some(clamp_pct(pct));
    }

    pub fn set_animation_speed(&mut self, speed: u8) {
        self.animation_speed = Some(speed);
    }

    pub fn set_max_open(&mut self, pct: i32) {
        self.max_open_pct = Some(clamp_pct(pct));
    }

    pub fn set_color_scheme(&mut self, colors: Vec<Rgb>) {
        self.color_scheme = Some(colors);
    }

    pub fn set_wifi_status(&mut self, status: WifiStatus) {
        self.wifi_status = Some(status);
    }

    pub fn set_model(&mut self, model: Option<String>) {
        self.model = model;
    }

    pub fn set_manufacturer(&mut self, manufacturer: Option<String>) {
        self.manufacturer = manufacturer;
    }

    pub fn set_firmware_version(&mut self, firmware: Option<String>) {
        self.firmware_version = firmware;
    }

    pub fn set_serial_number(&mut self, serial: Option<String>) {
        self.serial_number = serial;
    }

    pub fn set_hardware_revision(&mut self, hardware: Option<String>) {
        self.hardware_revision = hardware;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let state = DeviceState::new("AA:BB:CC:DD:EE:FF", None);
        assert_eq!(state.display_name(), DEFAULT_DISPLAY_NAME);
        assert_eq!(state.connection_state(), ConnectionState::Disconnected);
        assert_eq!(state.sequence_counter(), 1);
        assert_eq!(state.brightness_pct(), 100);
        assert_eq!(state.rgb(), Rgb::WHITE);
        assert_eq!(state.petal_position_pct(), 0);
        assert_eq!(state.battery_pct(), None);
        assert!(!state.power_on());
    }

    #[test]
    fn test_name_hint() {
        let state = DeviceState::new("addr", Some("  Living Room  "));
        assert_eq!(state.display_name(), "Living Room");

        let state = DeviceState::new("addr", Some(""));
        assert_eq!(state.display_name(), DEFAULT_DISPLAY_NAME);
    }

    #[test]
    fn test_percentages_are_clamped() {
        let mut state = DeviceState::new("addr", None);

        state.set_petal_position(150);
        assert_eq!(state.petal_position_pct(), 100);
        state.set_petal_position(-5);
        assert_eq!(state.petal_position_pct(), 0);

        state.set_brightness(150);
        assert_eq!(state.brightness_pct(), 100);
        state.set_brightness(-5);
        assert_eq!(state.brightness_pct(), 0);

        state.set_battery(255);
        assert_eq!(state.battery_pct(), Some(100));
        state.set_battery(42);
        assert_eq!(state.battery_pct(), Some(42));
    }

    #[test]
    fn test_message_ids_increase_and_wrap() {
        let mut state = DeviceState::new("addr", None);
        let ids: Vec<u16> = (0..5).map(|_| state.issue_message_id()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);

        let mut previous = state.issue_message_id();
        for _ in 0..65_000 {
            let id = state.issue_message_id();
            assert_eq!(id, previous.wrapping_add(1));
            previous = id;
        }

        // 65536 ids after the first one we are back where we started
        let mut state = DeviceState::new("addr", None);
        let first = state.issue_message_id();
        for _ in 0..65_535 {
            assert_ne!(state.issue_message_id(), first);
        }
        assert_eq!(state.issue_message_id(), first);
    }

    #[test]
    fn test_power_source_from_byte() {
        assert_eq!(PowerSource::from_power_state(0b0011_1011), PowerSource::Charging);
        assert_eq!(PowerSource::from_power_state(0b0010_1111), PowerSource::Battery);
        assert_eq!(PowerSource::from_power_state(0), PowerSource::Battery);
    }

    #[test]
    fn test_wifi_status_labels() {
        assert_eq!(WifiStatus::from_code(4), WifiStatus::CloudConnected);
        assert_eq!(WifiStatus::from_code(4).to_string(), "Floud connected (4)");
        assert_eq!(WifiStatus::from_code(1).to_string(), "Not configured (1)");
        assert_eq!(WifiStatus::from_code(9), WifiStatus::Unknown(9));
        assert_eq!(WifiStatus::from_code(9).to_string(), "Unknown (9)");
    }

    #[test]
    fn test_blank_display_name_ignored() {
        let mut state = DeviceState::new("addr", Some("Lamp"));
        state.set_display_name("\0\0".trim_matches('\0'));
        assert_eq!(state.display_name(), "Lamp");
        state.set_display_name("Bedroom");
        assert_eq!(state.display_name(), "Bedroom");
    }
}
