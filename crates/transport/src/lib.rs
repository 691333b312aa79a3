//! # CarLink Transport
//!
//! The wire engine between raw GATT characteristics and feature-level
//! messaging: packet framing and reassembly, optional zlib compression, the
//! ordered message stream, and the version exchange that runs before any of
//! it carries user data.
//!
//! ## Module Structure
//!
//! - `peripheral`: abstraction over the connected GATT peripheral
//! - `message_id`: process-wide message-id counter
//! - `framer`: chunking outbound payloads into MTU-sized packets, reassembly
//! - `compression`: raw-zlib payload transform
//! - `stream`: the reliable, ordered, typed message boundary
//! - `version`: messaging/security version negotiation

pub mod compression;
pub mod framer;
pub mod message_id;
pub mod peripheral;
pub mod stream;
pub mod version;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use framer::{FramerError, PacketReassembler};
pub use peripheral::{ConnectionState, Peripheral, PeripheralError, PeripheralEvent};
pub use stream::{MessageEncryptor, MessageStream, StreamError, StreamEvent};
pub use version::{ResolutionStep, ResolvedVersions, VersionError, VersionResolver};

/// Hard ceiling on the serialized size of one BLE packet, in bytes.
///
/// Writes use `min(peripheral.max_write_length(), MAX_PACKET_SIZE)`.
pub const MAX_PACKET_SIZE: usize = 182;
