//! Bluetooth Module
//!
//! Talks to a flower lamp over BLE GATT.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                   ConnectionManager                      │
//! │  (link lifecycle, cached DeviceState, event fan-out)     │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼──────────────┬──────────────┐
//!         │             │              │              │
//!         ▼             ▼              ▼              ▼
//! ┌────────────┐ ┌─────────────┐ ┌──────────┐ ┌─────────────┐
//! │  Commands  │ │Notifications│ │ Protocol │ │  Transport  │
//! │            │ │             │ │          │ │             │
//! │ - intents  │ │ - inbound   │ │ - UUIDs  │ │ - platform  │
//! │ - scaling  │ │   fan-out   │ │ - framing│ │   GATT I/O  │
//! └────────────┘ └─────────────┘ └──────────┘ └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Characteristic UUIDs, packet framing and payload encoding
//! - [`transport`] - The platform boundary every GATT operation goes through
//! - [`connection`] - Connect, disconnect and link-loss handling
//! - [`commands`] - One method per user intent
//! - [`notifications`] - Routes inbound notifications to observers

pub mod commands;
pub mod connection;
pub mod error;
pub mod notifications;
pub mod protocol;
pub mod transport;

#[cfg(feature = "btleplug")]
pub mod btleplug_transport;

#[cfg(test)]
pub(crate) mod testing;

pub use commands::{Customization, TurnOn};
pub use connection::{
    CharacteristicMap, ConnectReport, ConnectStep, ConnectionConfig, ConnectionManager,
    StepOutcome,
};
pub use error::{DeviceError, TransportError};
pub use transport::BleTransport;

#[cfg(feature = "btleplug")]
pub use btleplug_transport::BtleplugTransport;
