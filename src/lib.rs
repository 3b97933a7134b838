//! Device communication core for BLE flower lamps.
//!
//! [`ConnectionManager`] owns one peer: it brings the link up, keeps a cached
//! [`DeviceState`], turns user intents into framed command packets and
//! forwards inbound notifications to every subscriber.

pub mod domain;
pub mod infrastructure;

pub use domain::models::{ConnectionState, DeviceEvent, DeviceState, PowerSource, Rgb, WifiStatus};
pub use domain::settings::{Settings, SettingsService};
pub use infrastructure::bluetooth::{
    BleTransport, ConnectReport, ConnectionConfig, ConnectionManager, Customization, DeviceError,
    TransportError, TurnOn,
};
