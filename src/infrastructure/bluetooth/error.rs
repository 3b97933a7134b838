use crate::infrastructure::bluetooth::protocol::ProtocolError;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Failures reported by the platform BLE primitive
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("peer {0} not found")]
    PeerNotFound(String),
    #[error("characteristic {0} not found")]
    CharacteristicNotFound(Uuid),
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("characteristic returned an empty value")]
    EmptyValue,
    #[error("link closed")]
    LinkClosed,
    #[error("{0}")]
    Platform(String),
}

#[derive(Debug, Error)]
pub enum DeviceError {
    /// The connect primitive failed or timed out
    #[error("link unavailable: {0}")]
    LinkUnavailable(TransportError),
    #[error("device not connected")]
    NotConnected,
    /// The link dropped while a command was in flight
    #[error("link lost during operation")]
    LinkLost,
    #[error("command payload too large: {size} bytes (max 255)")]
    PayloadTooLarge { size: usize },
    #[error("color scheme needs 1 to 10 colors, got {count}")]
    InvalidColorScheme { count: usize },
    #[error("write to {characteristic} failed: {source}")]
    TransportWriteFailed {
        characteristic: Uuid,
        source: TransportError,
    },
    #[error("read from {characteristic} failed: {source}")]
    TransportReadFailed {
        characteristic: Uuid,
        source: TransportError,
    },
    #[error(transparent)]
    Protocol(ProtocolError),
}

impl From<ProtocolError> for DeviceError {
    fn from(error: ProtocolError) -> Self {
        match error {
            ProtocolError::PayloadTooLarge { size } => Self::PayloadTooLarge { size },
            other => Self::Protocol(other),
        }
    }
}
