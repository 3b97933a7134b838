//! In-memory transport for exercising the connection manager without a radio

use crate::infrastructure::bluetooth::connection::ConnectionConfig;
use crate::infrastructure::bluetooth::error::TransportError;
use crate::infrastructure::bluetooth::protocol::{self, CommandPacket};
use crate::infrastructure::bluetooth::transport::{
    BleTransport, DisconnectHandler, NotificationHandler,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

/// Short timeouts and no settle delay so tests stay fast
pub fn test_config() -> ConnectionConfig {
    ConnectionConfig {
        connect_timeout: Duration::from_millis(200),
        io_timeout: Duration::from_millis(200),
        settle_delay: Duration::ZERO,
        ..ConnectionConfig::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedWrite {
    pub characteristic: Uuid,
    pub bytes: Vec<u8>,
    pub with_response: bool,
}

/// Transport calls in the order they completed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Connect,
    Write(Uuid),
    Read(Uuid),
    Subscribe(Uuid),
    Unsubscribe(Uuid),
    Disconnect,
}

/// Parks one transport call until the test lets it through
#[derive(Default)]
pub struct Gate {
    entered: Notify,
    release: Notify,
}

impl Gate {
    /// Resolves once the held call has started
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_one();
    }

    async fn pass(&self) {
        self.entered.notify_one();
        self.release.notified().await;
    }
}

#[derive(Debug)]
pub struct FakeLink {
    pub generation: u64,
}

#[derive(Default)]
struct FakeInner {
    reads: HashMap<Uuid, Vec<u8>>,
    writes: Vec<RecordedWrite>,
    subscriptions: Vec<Uuid>,
    unsubscriptions: Vec<Uuid>,
    operations: Vec<Op>,
    connect_count: usize,
    disconnect_count: usize,
    connect_error: Option<TransportError>,
    hang_connect: bool,
    connect_gate: Option<Arc<Gate>>,
    write_gate: Option<Arc<Gate>>,
    fail_subscribe: bool,
    fail_writes: bool,
    drop_link_on_read: bool,
    drop_link_on_write: bool,
    link_up: bool,
    on_disconnect: Option<DisconnectHandler>,
    on_notify: HashMap<Uuid, NotificationHandler>,
}

#[derive(Clone, Default)]
pub struct FakeTransport {
    inner: Arc<Mutex<FakeInner>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, FakeInner> {
        self.inner.lock().unwrap()
    }

    pub fn set_read(&self, characteristic: Uuid, value: &[u8]) {
        self.inner().reads.insert(characteristic, value.to_vec());
    }

    pub fn fail_connect(&self, error: TransportError) {
        self.inner().connect_error = Some(error);
    }

    pub fn hang_connect(&self) {
        self.inner().hang_connect = true;
    }

    /// Hold the next connect until the returned gate is released
    pub fn hold_connect(&self) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        self.inner().connect_gate = Some(Arc::clone(&gate));
        gate
    }

    /// Hold the next write, before it is recorded, until the gate is released
    pub fn hold_next_write(&self) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        self.inner().write_gate = Some(Arc::clone(&gate));
        gate
    }

    pub fn fail_subscribe(&self) {
        self.inner().fail_subscribe = true;
    }

    pub fn fail_writes(&self) {
        self.inner().fail_writes = true;
    }

    pub fn allow_writes(&self) {
        self.inner().fail_writes = false;
    }

    /// Drop the link during the next read, before it returns
    pub fn drop_link_on_read(&self) {
        self.inner().drop_link_on_read = true;
    }

    /// Drop the link right after the next write is recorded
    pub fn drop_link_on_write(&self) {
        self.inner().drop_link_on_write = true;
    }

    /// Simulate the platform reporting a lost link
    pub fn fire_disconnect(&self) {
        let handler = {
            let mut inner = self.inner();
            inner.link_up = false;
            inner.on_disconnect.clone()
        };
        if let Some(handler) = handler {
            handler();
        }
    }

    /// Deliver a notification on the state characteristic
    pub fn notify(&self, payload: Vec<u8>) {
        self.notify_on(protocol::STATE_CHAR, payload);
    }

    pub fn notify_on(&self, characteristic: Uuid, payload: Vec<u8>) {
        let handler = self.inner().on_notify.get(&characteristic).cloned();
        if let Some(handler) = handler {
            handler(payload);
        }
    }

    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.inner().writes.clone()
    }

    /// Writes to the command characteristic, parsed
    pub fn packets(&self) -> Vec<CommandPacket> {
        self.writes()
            .iter()
            .filter(|write| write.characteristic == protocol::COMMAND_CHAR)
            .map(|write| CommandPacket::parse(&write.bytes).unwrap())
            .collect()
    }

    pub fn subscriptions(&self) -> Vec<Uuid> {
        self.inner().subscriptions.clone()
    }

    pub fn unsubscriptions(&self) -> Vec<Uuid> {
        self.inner().unsubscriptions.clone()
    }

    pub fn operations(&self) -> Vec<Op> {
        self.inner().operations.clone()
    }

    pub fn connect_count(&self) -> usize {
        self.inner().connect_count
    }

    pub fn disconnect_count(&self) -> usize {
        self.inner().disconnect_count
    }

    fn ensure_up(&self) -> Result<(), TransportError> {
        if self.inner().link_up {
            Ok(())
        } else {
            Err(TransportError::LinkClosed)
        }
    }
}

#[async_trait]
impl BleTransport for FakeTransport {
    type Link = FakeLink;

    async fn connect(
        &self,
        _peer_id: &str,
        _name_hint: &str,
        on_disconnect: DisconnectHandler,
    ) -> Result<FakeLink, TransportError> {
        let (hang, gate) = {
            let mut inner = self.inner();
            inner.connect_count += 1;
            if let Some(error) = inner.connect_error.clone() {
                return Err(error);
            }
            (inner.hang_connect, inner.connect_gate.take())
        };
        if hang {
            std::future::pending::<()>().await;
        }
        if let Some(gate) = gate {
            gate.pass().await;
        }

        let mut inner = self.inner();
        inner.link_up = true;
        inner.on_disconnect = Some(on_disconnect);
        inner.operations.push(Op::Connect);
        Ok(FakeLink {
            generation: inner.connect_count as u64,
        })
    }

    async fn write_characteristic(
        &self,
        _link: &FakeLink,
        characteristic: Uuid,
        bytes: &[u8],
        with_response: bool,
    ) -> Result<(), TransportError> {
        // Give concurrent callers a chance to interleave
        tokio::task::yield_now().await;
        let gate = self.inner().write_gate.take();
        if let Some(gate) = gate {
            gate.pass().await;
        }
        self.ensure_up()?;

        let drop_link = {
            let mut inner = self.inner();
            if inner.fail_writes {
                return Err(TransportError::Platform("write rejected".to_string()));
            }
            inner.writes.push(RecordedWrite {
                characteristic,
                bytes: bytes.to_vec(),
                with_response,
            });
            inner.operations.push(Op::Write(characteristic));
            std::mem::take(&mut inner.drop_link_on_write)
        };
        if drop_link {
            self.fire_disconnect();
        }
        Ok(())
    }

    async fn read_characteristic(
        &self,
        _link: &FakeLink,
        characteristic: Uuid,
    ) -> Result<Vec<u8>, TransportError> {
        self.ensure_up()?;

        let drop_link = std::mem::take(&mut self.inner().drop_link_on_read);
        if drop_link {
            self.fire_disconnect();
            return Err(TransportError::LinkClosed);
        }

        let mut inner = self.inner();
        inner.operations.push(Op::Read(characteristic));
        inner
            .reads
            .get(&characteristic)
            .cloned()
            .ok_or(TransportError::CharacteristicNotFound(characteristic))
    }

    async fn subscribe(
        &self,
        _link: &FakeLink,
        characteristic: Uuid,
        on_notify: NotificationHandler,
    ) -> Result<(), TransportError> {
        self.ensure_up()?;
        let mut inner = self.inner();
        if inner.fail_subscribe {
            return Err(TransportError::CharacteristicNotFound(characteristic));
        }
        inner.subscriptions.push(characteristic);
        inner.operations.push(Op::Subscribe(characteristic));
        inner.on_notify.insert(characteristic, on_notify);
        Ok(())
    }

    async fn unsubscribe(
        &self,
        _link: &FakeLink,
        characteristic: Uuid,
    ) -> Result<(), TransportError> {
        self.ensure_up()?;
        let mut inner = self.inner();
        inner.unsubscriptions.push(characteristic);
        // Handlers stay registered, as a platform may still deliver queued values
        inner.operations.push(Op::Unsubscribe(characteristic));
        Ok(())
    }

    async fn disconnect(&self, _link: &FakeLink) {
        {
            let mut inner = self.inner();
            inner.disconnect_count += 1;
            inner.operations.push(Op::Disconnect);
        }
        self.fire_disconnect();
    }
}
