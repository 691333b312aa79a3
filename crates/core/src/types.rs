//! Core type definitions

use carlink_proto::OperationType;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of an associated vehicle (head unit).
///
/// Opaque string, typically the text form of a UUID assigned by the head
/// unit at association time. Equality of two cars is equality of their ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CarId(String);

impl CarId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Parse the raw 16 bytes a head unit sends during association.
    ///
    /// Returns `None` unless the payload is exactly one UUID long.
    pub fn from_raw_bytes(bytes: &[u8]) -> Option<Self> {
        let uuid = Uuid::from_slice(bytes).ok()?;
        Some(Self(uuid.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An associated vehicle.
///
/// Value type; two cars are the same car when their ids match, regardless of
/// the display name the user picked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Car {
    pub id: CarId,
    pub name: Option<String>,
}

impl Car {
    pub fn new(id: CarId, name: Option<String>) -> Self {
        Self { id, name }
    }
}

impl PartialEq for Car {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Car {}

/// The phone's own identifier, sent to the head unit during association.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(Uuid);

impl DeviceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The 16 raw bytes that go on the wire.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for DeviceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Addressing attached to every message sent or delivered by the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageParams {
    /// Feature recipient the payload belongs to.
    pub recipient: Uuid,

    /// Kind of traffic this message carries.
    pub operation: OperationType,
}

impl MessageParams {
    pub fn new(recipient: Uuid, operation: OperationType) -> Self {
        Self {
            recipient,
            operation,
        }
    }

    /// Params for secure-channel handshake traffic.
    ///
    /// Handshake messages have no feature recipient; the nil UUID serializes
    /// as empty recipient bytes on the wire.
    pub fn handshake() -> Self {
        Self {
            recipient: Uuid::nil(),
            operation: OperationType::EncryptionHandshake,
        }
    }
}

/// Message stream revision selected during version resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamVersion {
    /// Earliest revision: no key agreement, supported only for legacy
    /// association flows.
    Passthrough,

    /// Framed v2 stream; compression support arrived with messaging v3.
    V2 { compression: bool },
}

impl StreamVersion {
    /// Whether the stream may compress outbound payloads.
    pub fn supports_compression(&self) -> bool {
        matches!(self, Self::V2 { compression: true })
    }
}

/// Security protocol revision selected during version resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SecurityVersion {
    V1,
    V2,
    V3,
    V4,
}

impl SecurityVersion {
    /// Map a wire version number to a known revision.
    pub fn from_wire(version: i32) -> Option<Self> {
        match version {
            1 => Some(Self::V1),
            2 => Some(Self::V2),
            3 => Some(Self::V3),
            4 => Some(Self::V4),
            _ => None,
        }
    }

    pub fn as_wire(&self) -> i32 {
        match self {
            Self::V1 => 1,
            Self::V2 => 2,
            Self::V3 => 3,
            Self::V4 => 4,
        }
    }

    /// Security v3 introduced the capabilities exchange.
    pub fn requires_capabilities_exchange(&self) -> bool {
        *self >= Self::V3
    }
}

impl fmt::Display for SecurityVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.as_wire())
    }
}
