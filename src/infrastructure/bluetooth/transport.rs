//! Platform BLE boundary
//!
//! The core never talks to a Bluetooth stack directly. Anything that can
//! connect to a known peer and read, write and subscribe to characteristics
//! by UUID can drive a [`ConnectionManager`](super::ConnectionManager).

use crate::infrastructure::bluetooth::error::TransportError;
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

/// Invoked by the platform whenever the link drops, at any time
pub type DisconnectHandler = Arc<dyn Fn() + Send + Sync>;

/// Invoked with the raw bytes of every notification on a subscribed characteristic
pub type NotificationHandler = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

#[async_trait]
pub trait BleTransport: Send + Sync + 'static {
    /// Handle for one established link
    type Link: Send + Sync + 'static;

    /// Establish the physical link. Implementations own low-level retry and backoff.
    async fn connect(
        &self,
        peer_id: &str,
        name_hint: &str,
        on_disconnect: DisconnectHandler,
    ) -> Result<Self::Link, TransportError>;

    async fn write_characteristic(
        &self,
        link: &Self::Link,
        characteristic: Uuid,
        bytes: &[u8],
        with_response: bool,
    ) -> Result<(), TransportError>;

    async fn read_characteristic(
        &self,
        link: &Self::Link,
        characteristic: Uuid,
    ) -> Result<Vec<u8>, TransportError>;

    async fn subscribe(
        &self,
        link: &Self::Link,
        characteristic: Uuid,
        on_notify: NotificationHandler,
    ) -> Result<(), TransportError>;

    async fn unsubscribe(&self, link: &Self::Link, characteristic: Uuid)
        -> Result<(), TransportError>;

    /// Close the link. Must not fail; errors are the implementation's to log.
    async fn disconnect(&self, link: &Self::Link);
}
