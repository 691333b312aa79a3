//! Abstraction over the connected GATT peripheral.
//!
//! The OS BLE adapter (discovery, service resolution, characteristic lookup)
//! lives outside this crate. What the stream needs from it is narrow: a
//! per-write byte budget, a way to write the write characteristic, and
//! notifications for the read characteristic — so that is all the trait
//! carries. Completion callbacks arrive as [`PeripheralEvent`]s on the
//! connection's event channel.

use thiserror::Error;
use uuid::Uuid;

/// Result type for peripheral operations
pub type Result<T> = std::result::Result<T, PeripheralError>;

/// Errors surfaced by the GATT layer
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PeripheralError {
    #[error("Peripheral is not connected")]
    NotConnected,

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Failed to configure notifications: {0}")]
    NotifyFailed(String),
}

/// Connection state of the underlying BLE link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// A connected GATT peripheral with resolved read/write characteristics.
///
/// Implementations wrap the platform BLE stack. All methods are non-blocking:
/// `write_value` hands the bytes to the OS and returns; readiness for the
/// next write is signalled by [`PeripheralEvent::ReadyToWrite`].
pub trait Peripheral: Send + Sync {
    /// Stable identifier of the remote device.
    fn identifier(&self) -> Uuid;

    fn state(&self) -> ConnectionState;

    /// Maximum bytes one write may carry (negotiated ATT MTU minus 3).
    fn max_write_length(&self) -> usize;

    /// Write to the peripheral's write characteristic.
    fn write_value(&self, data: &[u8]) -> Result<()>;

    /// Enable or disable notifications on the read characteristic.
    fn set_notify(&self, enabled: bool) -> Result<()>;
}

/// Events the GATT layer feeds into a connection's event loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeripheralEvent {
    /// The read characteristic delivered a value.
    ValueUpdated(Vec<u8>),

    /// The previous write completed; the next one may be issued.
    ReadyToWrite,

    /// The link's connection state changed.
    StateChanged(ConnectionState),
}
