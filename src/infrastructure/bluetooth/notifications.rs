//! Notification Dispatcher
//!
//! Inbound bytes on the state characteristic carry no defined structure in
//! this protocol revision. Each one becomes a single `StateChanged` event and
//! observers decide what to refresh. Battery and Wi-Fi characteristics carry
//! a single status byte, which is cached before the event goes out.

use crate::domain::models::{DeviceEvent, PowerSource, WifiStatus};
use crate::infrastructure::bluetooth::connection::Shared;
use crate::infrastructure::bluetooth::protocol::{self, Notification};
use crate::infrastructure::bluetooth::transport::NotificationHandler;
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

/// Which characteristic a subscription listens on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationSource {
    State,
    BatteryLevel,
    PowerState,
    WifiStatus,
}

pub struct NotificationDispatcher {
    shared: Weak<Shared>,
    /// Link generation this subscription belongs to
    epoch: u64,
    source: NotificationSource,
}

impl NotificationDispatcher {
    pub(crate) fn new(shared: Weak<Shared>, epoch: u64, source: NotificationSource) -> Self {
        Self {
            shared,
            epoch,
            source,
        }
    }

    pub fn dispatch(&self, payload: Vec<u8>) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        if !shared.is_current(self.epoch) {
            trace!("Dropping notification from a superseded link");
            return;
        }

        debug!("Received {:?} notification: {}", self.source, protocol::hex(&payload));

        let event = match self.source {
            NotificationSource::State => {
                if let Notification::Fields(fields) = protocol::decode_notification(&payload) {
                    // Not reconciled into the cached state until the firmware defines these fields
                    debug!("Notification fields: {:?}", fields);
                }
                DeviceEvent::StateChanged { payload }
            }
            NotificationSource::BatteryLevel => {
                let Some(&level) = payload.first() else {
                    debug!("Ignoring empty battery notification");
                    return;
                };
                let mut state = shared.state();
                state.set_battery(i32::from(level));
                DeviceEvent::BatteryChanged {
                    battery_pct: state.battery_pct(),
                    power_source: state.power_source(),
                }
            }
            NotificationSource::PowerState => {
                let Some(&byte) = payload.first() else {
                    debug!("Ignoring empty power state notification");
                    return;
                };
                let mut state = shared.state();
                state.set_power_source(PowerSource::from_power_state(byte));
                DeviceEvent::BatteryChanged {
                    battery_pct: state.battery_pct(),
                    power_source: state.power_source(),
                }
            }
            NotificationSource::WifiStatus => {
                let Some(&code) = payload.first() else {
                    debug!("Ignoring empty Wi-Fi status notification");
                    return;
                };
                let status = WifiStatus::from_code(code);
                shared.state().set_wifi_status(status);
                DeviceEvent::WifiStatusChanged { status }
            }
        };

        shared.emit(event);
    }

    pub fn into_handler(self) -> NotificationHandler {
        Arc::new(move |payload| self.dispatch(payload))
    }
}
