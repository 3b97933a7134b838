//! Desktop transport on top of `btleplug`
//!
//! The peer is found by scanning until its address (or platform id, on
//! systems that hide addresses) shows up. Notifications arrive on one stream
//! per peripheral and are routed to the handler registered for their
//! characteristic. A central event task watches for the peripheral going away.

use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::error::TransportError;
use crate::infrastructure::bluetooth::transport::{
    BleTransport, DisconnectHandler, NotificationHandler,
};
use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(250);

type HandlerMap = Arc<Mutex<HashMap<Uuid, NotificationHandler>>>;

fn platform(error: btleplug::Error) -> TransportError {
    TransportError::Platform(error.to_string())
}

/// A discovered peer, as listed by [`BtleplugTransport::scan`]
#[derive(Debug, Clone)]
pub struct DiscoveredPeer {
    pub address: String,
    pub id: String,
    pub local_name: Option<String>,
    pub rssi: Option<i16>,
}

pub struct BtleplugLink {
    peripheral: Peripheral,
    characteristics: HashMap<Uuid, Characteristic>,
    handlers: HandlerMap,
    tasks: Vec<JoinHandle<()>>,
}

impl BtleplugLink {
    fn characteristic(&self, uuid: Uuid) -> Result<&Characteristic, TransportError> {
        self.characteristics
            .get(&uuid)
            .ok_or(TransportError::CharacteristicNotFound(uuid))
    }
}

impl Drop for BtleplugLink {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

pub struct BtleplugTransport {
    adapter: Adapter,
    scan_timeout: Duration,
    connect_attempts: u32,
    retry_delay: Duration,
}

impl BtleplugTransport {
    /// Use the first Bluetooth adapter the platform reports
    pub async fn new(settings: &Settings) -> Result<Self, TransportError> {
        let manager = Manager::new().await.map_err(platform)?;
        let adapter = manager
            .adapters()
            .await
            .map_err(platform)?
            .into_iter()
            .next()
            .ok_or_else(|| TransportError::Platform("No Bluetooth adapter found".to_string()))?;

        if let Ok(info) = adapter.adapter_info().await {
            info!("Using Bluetooth adapter {}", info);
        }

        let timing = &settings.timing;
        Ok(Self {
            adapter,
            scan_timeout: Duration::from_millis(timing.scan_timeout_ms),
            connect_attempts: timing.connect_attempts.max(1),
            retry_delay: Duration::from_millis(timing.connect_retry_delay_ms),
        })
    }

    /// Scan for the configured timeout and list every peer seen
    pub async fn scan(&self) -> Result<Vec<DiscoveredPeer>, TransportError> {
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(platform)?;
        sleep(self.scan_timeout).await;
        self.stop_scan().await;

        let mut found = Vec::new();
        for peripheral in self.adapter.peripherals().await.map_err(platform)? {
            let properties = peripheral.properties().await.map_err(platform)?;
            found.push(DiscoveredPeer {
                address: peripheral.address().to_string(),
                id: peripheral.id().to_string(),
                local_name: properties.as_ref().and_then(|p| p.local_name.clone()),
                rssi: properties.as_ref().and_then(|p| p.rssi),
            });
        }
        Ok(found)
    }

    async fn stop_scan(&self) {
        if let Err(e) = self.adapter.stop_scan().await {
            debug!("Failed to stop scan cleanly: {}", e);
        }
    }

    async fn find_peer(&self, peer_id: &str) -> Result<Peripheral, TransportError> {
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(platform)?;

        let deadline = Instant::now() + self.scan_timeout;
        let found = loop {
            let peripherals = self.adapter.peripherals().await.map_err(platform)?;
            if let Some(peripheral) = peripherals.into_iter().find(|p| {
                p.address().to_string().eq_ignore_ascii_case(peer_id)
                    || p.id().to_string().eq_ignore_ascii_case(peer_id)
            }) {
                break Some(peripheral);
            }
            if Instant::now() >= deadline {
                break None;
            }
            sleep(SCAN_POLL_INTERVAL).await;
        };

        self.stop_scan().await;
        found.ok_or_else(|| TransportError::PeerNotFound(peer_id.to_string()))
    }

    async fn connect_with_retry(&self, peripheral: &Peripheral) -> Result<(), TransportError> {
        let mut attempt = 1;
        loop {
            match peripheral.connect().await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.connect_attempts => {
                    warn!(
                        "Connect attempt {}/{} failed: {}",
                        attempt, self.connect_attempts, e
                    );
                    attempt += 1;
                    sleep(self.retry_delay).await;
                }
                Err(e) => return Err(platform(e)),
            }
        }
    }

    async fn watch_disconnect(
        &self,
        peripheral: &Peripheral,
        on_disconnect: DisconnectHandler,
    ) -> Result<JoinHandle<()>, TransportError> {
        let mut events = self.adapter.events().await.map_err(platform)?;
        let id = peripheral.id();
        Ok(tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(gone) = event {
                    if gone == id {
                        on_disconnect();
                        break;
                    }
                }
            }
        }))
    }

    async fn route_notifications(
        peripheral: &Peripheral,
        handlers: HandlerMap,
    ) -> Result<JoinHandle<()>, TransportError> {
        let mut notifications = peripheral.notifications().await.map_err(platform)?;
        Ok(tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                let handler = handlers
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get(&notification.uuid)
                    .cloned();
                match handler {
                    Some(handler) => handler(notification.value),
                    None => debug!("Unrouted notification from {}", notification.uuid),
                }
            }
        }))
    }

    /// Discover services and start the background tasks for a connected peripheral.
    ///
    /// Tasks are pushed into the link as they start so dropping a partial link
    /// aborts them.
    async fn open_link(
        &self,
        peripheral: Peripheral,
        on_disconnect: DisconnectHandler,
    ) -> Result<BtleplugLink, TransportError> {
        peripheral.discover_services().await.map_err(platform)?;

        let characteristics: HashMap<Uuid, Characteristic> = peripheral
            .characteristics()
            .into_iter()
            .map(|c| (c.uuid, c))
            .collect();
        debug!("Discovered {} characteristics", characteristics.len());

        let mut link = BtleplugLink {
            peripheral,
            characteristics,
            handlers: HandlerMap::default(),
            tasks: Vec::new(),
        };
        link.tasks.push(self.watch_disconnect(&link.peripheral, on_disconnect).await?);
        link.tasks.push(
            Self::route_notifications(&link.peripheral, Arc::clone(&link.handlers)).await?,
        );
        Ok(link)
    }
}

/// Runs its cleanup on drop unless disarmed first
struct CloseOnDrop<F: FnOnce()> {
    cleanup: Option<F>,
}

impl<F: FnOnce()> CloseOnDrop<F> {
    fn new(cleanup: F) -> Self {
        Self {
            cleanup: Some(cleanup),
        }
    }

    fn disarm(&mut self) {
        self.cleanup = None;
    }
}

impl<F: FnOnce()> Drop for CloseOnDrop<F> {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}

/// Disconnect from a synchronous context, such as a drop
fn close_in_background(peripheral: Peripheral) {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        warn!("No runtime to close abandoned link to {}", peripheral.id());
        return;
    };
    runtime.spawn(async move {
        match peripheral.disconnect().await {
            Ok(()) => debug!("Closed abandoned link to {}", peripheral.id()),
            Err(e) => warn!("Failed to close abandoned link: {}", e),
        }
    });
}

#[async_trait]
impl BleTransport for BtleplugTransport {
    type Link = BtleplugLink;

    async fn connect(
        &self,
        peer_id: &str,
        name_hint: &str,
        on_disconnect: DisconnectHandler,
    ) -> Result<BtleplugLink, TransportError> {
        debug!("Scanning for {} ({})", name_hint, peer_id);
        let peripheral = self.find_peer(peer_id).await?;

        // Until disarmed, an error or a dropped future closes the peer in the background
        let mut pending = CloseOnDrop::new({
            let peripheral = peripheral.clone();
            move || close_in_background(peripheral)
        });
        if !peripheral.is_connected().await.map_err(platform)? {
            self.connect_with_retry(&peripheral).await?;
        }
        let link = self.open_link(peripheral, on_disconnect).await?;
        pending.disarm();
        Ok(link)
    }

    async fn write_characteristic(
        &self,
        link: &BtleplugLink,
        characteristic: Uuid,
        bytes: &[u8],
        with_response: bool,
    ) -> Result<(), TransportError> {
        let write_type = if with_response {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };
        link.peripheral
            .write(link.characteristic(characteristic)?, bytes, write_type)
            .await
            .map_err(platform)
    }

    async fn read_characteristic(
        &self,
        link: &BtleplugLink,
        characteristic: Uuid,
    ) -> Result<Vec<u8>, TransportError> {
        link.peripheral
            .read(link.characteristic(characteristic)?)
            .await
            .map_err(platform)
    }

    async fn subscribe(
        &self,
        link: &BtleplugLink,
        characteristic: Uuid,
        on_notify: NotificationHandler,
    ) -> Result<(), TransportError> {
        let target = link.characteristic(characteristic)?;
        link.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(characteristic, on_notify);
        link.peripheral.subscribe(target).await.map_err(platform)
    }

    async fn unsubscribe(
        &self,
        link: &BtleplugLink,
        characteristic: Uuid,
    ) -> Result<(), TransportError> {
        let target = link.characteristic(characteristic)?;
        link.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&characteristic);
        link.peripheral.unsubscribe(target).await.map_err(platform)
    }

    async fn disconnect(&self, link: &BtleplugLink) {
        if let Err(e) = link.peripheral.disconnect().await {
            warn!("Failed to disconnect cleanly: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, impl FnOnce()) {
        let count = Arc::new(AtomicUsize::new(0));
        let bump = {
            let count = Arc::clone(&count);
            move || {
                count.fetch_add(1, Ordering::SeqCst);
            }
        };
        (count, bump)
    }

    #[test]
    fn test_close_on_drop_unless_disarmed() {
        let (closed, cleanup) = counter();
        drop(CloseOnDrop::new(cleanup));
        assert_eq!(closed.load(Ordering::SeqCst), 1);

        let (closed, cleanup) = counter();
        let mut guard = CloseOnDrop::new(cleanup);
        guard.disarm();
        drop(guard);
        assert_eq!(closed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_close_on_drop_when_connect_is_abandoned() {
        let (closed, cleanup) = counter();
        let connecting = async move {
            let _guard = CloseOnDrop::new(cleanup);
            std::future::pending::<()>().await;
        };

        let result = tokio::time::timeout(Duration::from_millis(10), connecting).await;

        assert!(result.is_err());
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }
}
