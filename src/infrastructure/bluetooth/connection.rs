//! BLE Connection Module
//!
//! Owns the link lifecycle for one peer: connect, best-effort setup,
//! disconnect and platform link-loss handling. This is the only place the
//! cached connection state changes.

use crate::domain::models::{
    clamp_pct, ConnectionState, DeviceEvent, DeviceState, PowerSource, Rgb, WifiStatus,
};
use crate::domain::settings::{CharacteristicSettings, CommandCodes, Settings};
use crate::infrastructure::bluetooth::error::{DeviceError, TransportError};
use crate::infrastructure::bluetooth::notifications::{NotificationDispatcher, NotificationSource};
use crate::infrastructure::bluetooth::protocol::{self, EmptyPayload, ProtocolError};
use crate::infrastructure::bluetooth::transport::{BleTransport, DisconnectHandler};
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Manufacturer reported when the device information read fails
pub const UNKNOWN_MANUFACTURER: &str = "Unknown";
/// Model reported when the device information read fails
pub const DEFAULT_MODEL: &str = "Flower Light";

/// Resolved characteristic identifiers for one device family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacteristicMap {
    pub command: Uuid,
    pub state: Uuid,
    pub name: Uuid,
    pub brightness: Uuid,
    pub speed: Uuid,
    pub max_open: Uuid,
    pub color_scheme: Uuid,
    pub wifi_status: Uuid,
    pub battery_level: Uuid,
    pub battery_power_state: Uuid,
    pub model: Uuid,
    pub serial: Uuid,
    pub firmware: Uuid,
    pub hardware: Uuid,
    pub manufacturer: Uuid,
}

impl Default for CharacteristicMap {
    fn default() -> Self {
        Self {
            command: protocol::COMMAND_CHAR,
            state: protocol::STATE_CHAR,
            name: protocol::NAME_CHAR,
            brightness: protocol::BRIGHTNESS_CHAR,
            speed: protocol::SPEED_CHAR,
            max_open: protocol::MAX_OPEN_CHAR,
            color_scheme: protocol::COLOR_SCHEME_CHAR,
            wifi_status: protocol::WIFI_STATUS_CHAR,
            battery_level: protocol::BATTERY_LEVEL_CHAR,
            battery_power_state: protocol::BATTERY_POWER_STATE_CHAR,
            model: protocol::MODEL_CHAR,
            serial: protocol::SERIAL_CHAR,
            firmware: protocol::FIRMWARE_CHAR,
            hardware: protocol::HARDWARE_CHAR,
            manufacturer: protocol::MANUFACTURER_CHAR,
        }
    }
}

impl CharacteristicMap {
    pub fn from_settings(settings: &CharacteristicSettings) -> Result<Self, ProtocolError> {
        Ok(Self {
            command: protocol::parse_uuid(&settings.command)?,
            state: protocol::parse_uuid(&settings.state)?,
            name: protocol::parse_uuid(&settings.name)?,
            brightness: protocol::parse_uuid(&settings.brightness)?,
            speed: protocol::parse_uuid(&settings.speed)?,
            max_open: protocol::parse_uuid(&settings.max_open)?,
            color_scheme: protocol::parse_uuid(&settings.color_scheme)?,
            wifi_status: protocol::parse_uuid(&settings.wifi_status)?,
            battery_level: protocol::parse_uuid(&settings.battery_level)?,
            battery_power_state: protocol::parse_uuid(&settings.battery_power_state)?,
            model: protocol::parse_uuid(&settings.model)?,
            serial: protocol::parse_uuid(&settings.serial)?,
            firmware: protocol::parse_uuid(&settings.firmware)?,
            hardware: protocol::parse_uuid(&settings.hardware)?,
            manufacturer: protocol::parse_uuid(&settings.manufacturer)?,
        })
    }
}

/// Configuration for connection behavior
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub characteristics: CharacteristicMap,
    pub commands: CommandCodes,
    /// Upper bound on the platform connect primitive, retries included
    pub connect_timeout: Duration,
    /// Upper bound on every read, write and subscribe
    pub io_timeout: Duration,
    /// Peer-side initialisation time before the first characteristic I/O
    pub settle_delay: Duration,
    pub default_transition_ms: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            characteristics: CharacteristicMap::default(),
            commands: CommandCodes::default(),
            connect_timeout: Duration::from_secs(30),
            io_timeout: Duration::from_secs(10),
            settle_delay: Duration::from_millis(500),
            default_transition_ms: 1000,
        }
    }
}

impl ConnectionConfig {
    pub fn from_settings(settings: &Settings) -> Result<Self, ProtocolError> {
        let timing = &settings.timing;
        Ok(Self {
            characteristics: CharacteristicMap::from_settings(&settings.ble.characteristics)?,
            commands: settings.ble.commands,
            connect_timeout: Duration::from_millis(timing.connect_timeout_ms),
            io_timeout: Duration::from_millis(timing.io_timeout_ms),
            settle_delay: Duration::from_millis(timing.settle_delay_ms),
            default_transition_ms: timing.default_transition_ms,
        })
    }
}

/// Best-effort follow-ups performed after the link comes up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectStep {
    SubscribeNotifications,
    SubscribeBattery,
    SubscribePowerState,
    SubscribeWifiStatus,
    TakeoverAck,
    Manufacturer,
    Model,
    Firmware,
    Hardware,
    Serial,
    DisplayName,
    BrightnessConfig,
    AnimationSpeed,
    MaxOpen,
    ColorScheme,
    WifiStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Done,
    /// The link was gone before the step could run
    Skipped,
    Failed(String),
}

/// What happened to each best-effort step of a connect or refresh
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectReport {
    steps: Vec<(ConnectStep, StepOutcome)>,
}

impl ConnectReport {
    fn record(&mut self, step: ConnectStep, outcome: StepOutcome) {
        self.steps.push((step, outcome));
    }

    pub fn steps(&self) -> &[(ConnectStep, StepOutcome)] {
        &self.steps
    }

    pub fn outcome(&self, step: ConnectStep) -> Option<&StepOutcome> {
        self.steps
            .iter()
            .find(|(recorded, _)| *recorded == step)
            .map(|(_, outcome)| outcome)
    }

    pub fn failures(&self) -> impl Iterator<Item = (ConnectStep, &str)> + '_ {
        self.steps.iter().filter_map(|(step, outcome)| match outcome {
            StepOutcome::Failed(reason) => Some((*step, reason.as_str())),
            _ => None,
        })
    }

    /// True when every recorded step completed
    pub fn is_complete(&self) -> bool {
        self.steps
            .iter()
            .all(|(_, outcome)| *outcome == StepOutcome::Done)
    }

    fn failed(&self, step: ConnectStep) -> bool {
        matches!(self.outcome(step), Some(StepOutcome::Failed(_)))
    }
}

/// State reachable from platform callbacks as well as from the manager
pub(crate) struct Shared {
    state: Mutex<DeviceState>,
    /// Unbounded so a slow observer never loses events; closed receivers are pruned on emit
    observers: Mutex<Vec<mpsc::UnboundedSender<DeviceEvent>>>,
    /// Bumped on every connect attempt and explicit disconnect so callbacks
    /// from a superseded link can be recognised
    epoch: AtomicU64,
}

impl Shared {
    pub(crate) fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn emit(&self, event: DeviceEvent) {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|observer| observer.send(event.clone()).is_ok());
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<DeviceEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    pub(crate) fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    fn is_live(&self, epoch: u64) -> bool {
        self.is_current(epoch) && self.state().is_connected()
    }

    fn handle_link_lost(&self, epoch: u64) {
        if !self.is_current(epoch) {
            debug!("Ignoring disconnect signal from a superseded link");
            return;
        }

        let (previous, address) = {
            let mut state = self.state();
            (
                state.set_connection_state(ConnectionState::Disconnected),
                state.address().to_string(),
            )
        };

        if previous != ConnectionState::Disconnected {
            warn!("Device {} disconnected", address);
            self.emit(DeviceEvent::Disconnected);
        }
    }
}

/// Puts the state back to `Disconnected` if a connect attempt is dropped
/// before the link comes up
struct ConnectAttempt<'a> {
    shared: &'a Shared,
    epoch: u64,
    settled: bool,
}

impl<'a> ConnectAttempt<'a> {
    fn new(shared: &'a Shared, epoch: u64) -> Self {
        Self {
            shared,
            epoch,
            settled: false,
        }
    }

    fn settle(&mut self) {
        self.settled = true;
    }
}

impl Drop for ConnectAttempt<'_> {
    fn drop(&mut self) {
        if self.settled || !self.shared.is_current(self.epoch) {
            return;
        }
        let mut state = self.shared.state();
        if state.connection_state() == ConnectionState::Connecting {
            debug!("Connect attempt to {} abandoned", state.address());
            state.set_connection_state(ConnectionState::Disconnected);
        }
    }
}

/// Manages the single link to one peer.
///
/// Every GATT operation goes through `link`, an async mutex, so packets hit
/// the air in the order their message ids were issued and connect, commands
/// and disconnect never interleave.
pub struct ConnectionManager<T: BleTransport> {
    pub(super) transport: T,
    pub(super) config: ConnectionConfig,
    pub(super) shared: Arc<Shared>,
    pub(super) link: AsyncMutex<Option<T::Link>>,
    /// Characteristics with notifications enabled on the current link
    subscribed: Mutex<Vec<Uuid>>,
}

impl<T: BleTransport> ConnectionManager<T> {
    pub fn new(
        transport: T,
        address: impl Into<String>,
        name_hint: Option<&str>,
        config: ConnectionConfig,
    ) -> Self {
        Self {
            transport,
            config,
            shared: Arc::new(Shared {
                state: Mutex::new(DeviceState::new(address, name_hint)),
                observers: Mutex::new(Vec::new()),
                epoch: AtomicU64::new(0),
            }),
            link: AsyncMutex::new(None),
            subscribed: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn address(&self) -> String {
        self.shared.state().address().to_string()
    }

    /// Copy of the cached device state
    pub fn snapshot(&self) -> DeviceState {
        self.shared.state().clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.state().connection_state()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state().is_connected()
    }

    /// Register an observer for connection and notification events.
    ///
    /// Every observer receives every event in emission order. Dropping the
    /// receiver unregisters it.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<DeviceEvent> {
        self.shared.subscribe()
    }

    fn subscribed(&self) -> MutexGuard<'_, Vec<Uuid>> {
        self.subscribed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bring up the link and run the best-effort setup steps.
    ///
    /// Succeeds whenever the physical link was established; the returned
    /// report says which follow-up steps worked. Dropping the future before
    /// the link is up leaves the state `Disconnected`.
    pub async fn connect(&self) -> Result<ConnectReport, DeviceError> {
        let mut slot = self.link.lock().await;

        if slot.is_some() && self.is_connected() {
            debug!("Already connected to {}", self.address());
            return Ok(ConnectReport::default());
        }

        if let Some(stale) = slot.take() {
            debug!("Releasing stale link before reconnecting");
            if timeout(self.config.io_timeout, self.transport.disconnect(&stale))
                .await
                .is_err()
            {
                warn!("Timed out releasing stale link");
            }
        }
        self.subscribed().clear();

        // Bump first so the previous link's callbacks cannot touch the new attempt
        let epoch = self.shared.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let (address, name) = {
            let mut state = self.shared.state();
            state.set_connection_state(ConnectionState::Connecting);
            (state.address().to_string(), state.display_name().to_string())
        };
        let mut attempt = ConnectAttempt::new(&self.shared, epoch);

        info!("Connecting to {} ({})", name, address);

        let shared = Arc::downgrade(&self.shared);
        let on_disconnect: DisconnectHandler = Arc::new(move || {
            if let Some(shared) = shared.upgrade() {
                shared.handle_link_lost(epoch);
            }
        });

        let connected = timeout(
            self.config.connect_timeout,
            self.transport.connect(&address, &name, on_disconnect),
        )
        .await
        .unwrap_or(Err(TransportError::Timeout(self.config.connect_timeout)));

        let link = match connected {
            Ok(link) => link,
            Err(e) => {
                error!("Failed to connect to {}: {}", address, e);
                return Err(DeviceError::LinkUnavailable(e));
            }
        };

        let still_connecting = {
            let mut state = self.shared.state();
            if state.connection_state() == ConnectionState::Connecting {
                state.set_connection_state(ConnectionState::Connected);
                true
            } else {
                false
            }
        };
        if !still_connecting {
            warn!("Link to {} dropped while connecting", address);
            self.transport.disconnect(&link).await;
            return Err(DeviceError::LinkLost);
        }
        attempt.settle();
        let link: &T::Link = slot.insert(link);

        info!("Connected to {} ({})", name, address);
        self.shared.emit(DeviceEvent::Connected);

        tokio::time::sleep(self.config.settle_delay).await;

        let mut report = ConnectReport::default();
        self.subscribe_notifications(link, epoch, &mut report).await;
        self.acknowledge_takeover(link, epoch, &mut report).await;
        self.read_metadata(link, epoch, &mut report).await;

        for (step, reason) in report.failures() {
            debug!("Connect step {:?} failed (this is OK): {}", step, reason);
        }
        Ok(report)
    }

    /// Close the link. Idempotent and never fails.
    ///
    /// Waits for any in-flight command before releasing the link.
    pub async fn disconnect(&self) {
        let mut slot = self.link.lock().await;

        let was_live = self.is_connected();
        // Bump before closing so the platform's own disconnect callback is ignored
        self.shared.epoch.fetch_add(1, Ordering::SeqCst);
        let subscribed = std::mem::take(&mut *self.subscribed());

        if let Some(link) = slot.take() {
            if was_live {
                for characteristic in subscribed {
                    let result = self.io(self.transport.unsubscribe(&link, characteristic)).await;
                    if let Err(e) = result {
                        debug!("Could not stop notifications on {}: {}", characteristic, e);
                    }
                }
            }
            if timeout(self.config.io_timeout, self.transport.disconnect(&link))
                .await
                .is_err()
            {
                warn!("Timed out closing link");
            }
        }

        let (previous, name) = {
            let mut state = self.shared.state();
            (
                state.set_connection_state(ConnectionState::Disconnected),
                state.display_name().to_string(),
            )
        };

        if previous != ConnectionState::Disconnected {
            info!("Disconnected from {}", name);
            self.shared.emit(DeviceEvent::Disconnected);
        }
    }

    /// Re-read device information and configuration characteristics
    pub async fn refresh_metadata(&self) -> Result<ConnectReport, DeviceError> {
        let slot = self.link.lock().await;
        let (link, epoch) = self.live_link(&slot)?;

        let mut report = ConnectReport::default();
        self.read_metadata(link, epoch, &mut report).await;
        Ok(report)
    }

    /// Read the battery level and cache it as a percentage
    pub async fn update_battery(&self) -> Result<u8, DeviceError> {
        let slot = self.link.lock().await;
        let (link, epoch) = self.live_link(&slot)?;

        let level = self
            .read_u8(link, epoch, self.config.characteristics.battery_level)
            .await?;
        let pct = clamp_pct(i32::from(level));
        self.shared.state().set_battery(i32::from(pct));
        debug!("Battery level: {}%", pct);
        Ok(pct)
    }

    /// Read whether the lamp is on its charger
    pub async fn update_power_source(&self) -> Result<PowerSource, DeviceError> {
        let slot = self.link.lock().await;
        let (link, epoch) = self.live_link(&slot)?;

        let byte = self
            .read_u8(link, epoch, self.config.characteristics.battery_power_state)
            .await?;
        let source = PowerSource::from_power_state(byte);
        self.shared.state().set_power_source(source);
        debug!("Power source: {} ({:#010b})", source, byte);
        Ok(source)
    }

    pub async fn update_wifi_status(&self) -> Result<WifiStatus, DeviceError> {
        let slot = self.link.lock().await;
        let (link, epoch) = self.live_link(&slot)?;

        let code = self
            .read_u8(link, epoch, self.config.characteristics.wifi_status)
            .await?;
        let status = WifiStatus::from_code(code);
        self.shared.state().set_wifi_status(status);
        debug!("Wi-Fi status: {}", status);
        Ok(status)
    }

    /// The current link, provided it is still the live one
    pub(super) fn live_link<'a>(
        &self,
        slot: &'a Option<T::Link>,
    ) -> Result<(&'a T::Link, u64), DeviceError> {
        let epoch = self.shared.epoch.load(Ordering::SeqCst);
        match slot {
            Some(link) if self.shared.is_live(epoch) => Ok((link, epoch)),
            _ => Err(DeviceError::NotConnected),
        }
    }

    /// Write an encoded packet to the command characteristic with response
    pub(super) async fn write_packet(
        &self,
        link: &T::Link,
        epoch: u64,
        bytes: &[u8],
    ) -> Result<(), DeviceError> {
        let characteristic = self.config.characteristics.command;
        let result = self
            .io(
                self.transport
                    .write_characteristic(link, characteristic, bytes, true),
            )
            .await;

        if !self.shared.is_live(epoch) {
            warn!("Link lost while writing to {}", characteristic);
            return Err(DeviceError::LinkLost);
        }
        result.map_err(|source| DeviceError::TransportWriteFailed {
            characteristic,
            source,
        })
    }

    async fn read(
        &self,
        link: &T::Link,
        epoch: u64,
        characteristic: Uuid,
    ) -> Result<Vec<u8>, DeviceError> {
        let result = self
            .io(self.transport.read_characteristic(link, characteristic))
            .await;

        if !self.shared.is_live(epoch) {
            return Err(DeviceError::LinkLost);
        }
        result.map_err(|source| DeviceError::TransportReadFailed {
            characteristic,
            source,
        })
    }

    async fn read_u8(
        &self,
        link: &T::Link,
        epoch: u64,
        characteristic: Uuid,
    ) -> Result<u8, DeviceError> {
        let data = self.read(link, epoch, characteristic).await?;
        data.first()
            .copied()
            .ok_or(DeviceError::TransportReadFailed {
                characteristic,
                source: TransportError::EmptyValue,
            })
    }

    async fn read_text(
        &self,
        link: &T::Link,
        epoch: u64,
        characteristic: Uuid,
    ) -> Result<String, DeviceError> {
        let data = self.read(link, epoch, characteristic).await?;
        Ok(decode_text(&data))
    }

    /// Bound a transport operation by the I/O timeout
    async fn io<R>(
        &self,
        operation: impl Future<Output = Result<R, TransportError>>,
    ) -> Result<R, TransportError> {
        timeout(self.config.io_timeout, operation)
            .await
            .unwrap_or(Err(TransportError::Timeout(self.config.io_timeout)))
    }

    /// Run one setup step, recording instead of propagating its failure
    async fn best_effort<R, E: Display>(
        &self,
        step: ConnectStep,
        epoch: u64,
        report: &mut ConnectReport,
        operation: impl Future<Output = Result<R, E>>,
    ) -> Option<R> {
        if !self.shared.is_live(epoch) {
            report.record(step, StepOutcome::Skipped);
            return None;
        }

        match operation.await {
            Ok(value) => {
                report.record(step, StepOutcome::Done);
                Some(value)
            }
            Err(e) => {
                report.record(step, StepOutcome::Failed(e.to_string()));
                None
            }
        }
    }

    async fn subscribe_notifications(
        &self,
        link: &T::Link,
        epoch: u64,
        report: &mut ConnectReport,
    ) {
        let chars = self.config.characteristics;
        let sources = [
            (ConnectStep::SubscribeNotifications, chars.state, NotificationSource::State),
            (ConnectStep::SubscribeBattery, chars.battery_level, NotificationSource::BatteryLevel),
            (
                ConnectStep::SubscribePowerState,
                chars.battery_power_state,
                NotificationSource::PowerState,
            ),
            (ConnectStep::SubscribeWifiStatus, chars.wifi_status, NotificationSource::WifiStatus),
        ];

        for (step, characteristic, source) in sources {
            let handler = NotificationDispatcher::new(Arc::downgrade(&self.shared), epoch, source)
                .into_handler();
            let subscribed = self
                .best_effort(
                    step,
                    epoch,
                    report,
                    self.io(self.transport.subscribe(link, characteristic, handler)),
                )
                .await;
            if subscribed.is_some() {
                debug!("{:?} notifications enabled", source);
                self.subscribed().push(characteristic);
            }
        }
    }

    /// An empty write-state command releases the peer from pairing mode
    /// without changing petals or colour
    async fn acknowledge_takeover(&self, link: &T::Link, epoch: u64, report: &mut ConnectReport) {
        let write_state = self.config.commands.write_state;
        let sent = self
            .best_effort(
                ConnectStep::TakeoverAck,
                epoch,
                report,
                self.send_locked(link, epoch, "takeover acknowledgment", write_state, |_| {
                    (EmptyPayload {}, |_: &mut DeviceState| {})
                }),
            )
            .await;
        if sent.is_some() {
            debug!("Sent pairing acknowledgment command");
        }
    }

    async fn read_metadata(&self, link: &T::Link, epoch: u64, report: &mut ConnectReport) {
        let chars = self.config.characteristics;

        let manufacturer = self
            .best_effort(
                ConnectStep::Manufacturer,
                epoch,
                report,
                self.read_text(link, epoch, chars.manufacturer),
            )
            .await;
        if manufacturer.is_some() || report.failed(ConnectStep::Manufacturer) {
            let manufacturer = manufacturer.unwrap_or_else(|| UNKNOWN_MANUFACTURER.to_string());
            debug!("Manufacturer: {}", manufacturer);
            self.shared.state().set_manufacturer(Some(manufacturer));
        }

        let model = self
            .best_effort(
                ConnectStep::Model,
                epoch,
                report,
                self.read_text(link, epoch, chars.model),
            )
            .await;
        if model.is_some() || report.failed(ConnectStep::Model) {
            let model = model.unwrap_or_else(|| DEFAULT_MODEL.to_string());
            debug!("Model: {}", model);
            self.shared.state().set_model(Some(model));
        }

        if let Some(firmware) = self
            .best_effort(
                ConnectStep::Firmware,
                epoch,
                report,
                self.read_text(link, epoch, chars.firmware),
            )
            .await
        {
            debug!("Firmware: {}", firmware);
            self.shared.state().set_firmware_version(Some(firmware));
        }

        if let Some(hardware) = self
            .best_effort(
                ConnectStep::Hardware,
                epoch,
                report,
                self.read_text(link, epoch, chars.hardware),
            )
            .await
        {
            debug!("Hardware: {}", hardware);
            self.shared.state().set_hardware_revision(Some(hardware));
        }

        if let Some(serial) = self
            .best_effort(
                ConnectStep::Serial,
                epoch,
                report,
                self.read_text(link, epoch, chars.serial),
            )
            .await
        {
            debug!("Serial: {}", serial);
            self.shared.state().set_serial_number(Some(serial));
        }

        if let Some(name) = self
            .best_effort(
                ConnectStep::DisplayName,
                epoch,
                report,
                self.read_text(link, epoch, chars.name),
            )
            .await
        {
            debug!("Device name: {}", name);
            self.shared.state().set_display_name(&name);
        }

        if let Some(brightness) = self
            .best_effort(
                ConnectStep::BrightnessConfig,
                epoch,
                report,
                self.read_u8(link, epoch, chars.brightness),
            )
            .await
        {
            debug!("Brightness config: {}", brightness);
            self.shared
                .state()
                .set_brightness_config(i32::from(brightness));
        }

        if let Some(speed) = self
            .best_effort(
                ConnectStep::AnimationSpeed,
                epoch,
                report,
                self.read_u8(link, epoch, chars.speed),
            )
            .await
        {
            debug!("Animation speed: {}", speed);
            self.shared.state().set_animation_speed(speed);
        }

        if let Some(max_open) = self
            .best_effort(
                ConnectStep::MaxOpen,
                epoch,
                report,
                self.read_u8(link, epoch, chars.max_open),
            )
            .await
        {
            debug!("Max open: {}", max_open);
            self.shared.state().set_max_open(i32::from(max_open));
        }

        if let Some(scheme) = self
            .best_effort(
                ConnectStep::ColorScheme,
                epoch,
                report,
                self.read(link, epoch, chars.color_scheme),
            )
            .await
        {
            let colors: Vec<Rgb> = protocol::decode_color_scheme(&scheme)
                .into_iter()
                .map(Rgb::from)
                .collect();
            debug!("Color scheme: {} colors", colors.len());
            self.shared.state().set_color_scheme(colors);
        }

        if let Some(code) = self
            .best_effort(
                ConnectStep::WifiStatus,
                epoch,
                report,
                self.read_u8(link, epoch, chars.wifi_status),
            )
            .await
        {
            let status = WifiStatus::from_code(code);
            debug!("Wi-Fi status: {}", status);
            self.shared.state().set_wifi_status(status);
        }
    }
}

/// UTF-8 text characteristics are NUL padded; invalid sequences are dropped
fn decode_text(data: &[u8]) -> String {
    String::from_utf8_lossy(data)
        .replace(char::REPLACEMENT_CHARACTER, "")
        .trim_matches('\0')
        .to_string()
}
