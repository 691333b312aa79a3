//! Hand-written prost messages for the BLE wire protocol.
//!
//! Serialized form (binary, protobuf):
//! - `Packet`: `packet_number` is fixed32 so every packet header has a
//!   predictable size; the framer's chunking math depends on that.
//! - `DeviceMessage`: `original_size == 0` means the payload was never
//!   compressed; nonzero is the pre-compression byte count.
//! - `recipient` is `bytes` and must never be missing on the wire, so
//!   handshake messages carry it as empty bytes rather than omitting it.

/// One BLE frame. Packets sharing a `message_id` reassemble into a single
/// [`DeviceMessage`].
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Packet {
    /// 1-based position of this packet within its message.
    #[prost(fixed32, tag = "1")]
    pub packet_number: u32,

    /// Number of packets the full message occupies.
    #[prost(int32, tag = "2")]
    pub total_packets: i32,

    /// Identifier shared by all packets of one message.
    #[prost(int32, tag = "3")]
    pub message_id: i32,

    /// Slice of the serialized [`DeviceMessage`].
    #[prost(bytes = "vec", tag = "4")]
    pub payload: ::prost::alloc::vec::Vec<u8>,
}

/// The reassembled logical message exchanged between phone and head unit.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeviceMessage {
    #[prost(enumeration = "OperationType", tag = "1")]
    pub operation: i32,

    /// Whether `payload` went through the secure channel's encryptor.
    #[prost(bool, tag = "2")]
    pub is_payload_encrypted: bool,

    #[prost(bytes = "vec", tag = "3")]
    pub payload: ::prost::alloc::vec::Vec<u8>,

    /// Pre-compression byte count; 0 when the payload is not compressed.
    #[prost(uint32, tag = "4")]
    pub original_size: u32,

    /// Recipient UUID bytes; empty (not absent) for handshake traffic.
    #[prost(bytes = "vec", tag = "5")]
    pub recipient: ::prost::alloc::vec::Vec<u8>,
}

/// Kind of traffic a [`DeviceMessage`] carries.
///
/// Wire value 1 was retired before this protocol revision and stays unused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum OperationType {
    Unknown = 0,
    EncryptionHandshake = 2,
    ClientMessage = 3,
    Query = 4,
    QueryResponse = 5,
    Ack = 6,
}

/// Supported version ranges, exchanged as plain characteristic bytes before
/// the message stream exists.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct VersionExchange {
    #[prost(int32, tag = "1")]
    pub min_supported_messaging_version: i32,

    #[prost(int32, tag = "2")]
    pub max_supported_messaging_version: i32,

    #[prost(int32, tag = "3")]
    pub min_supported_security_version: i32,

    #[prost(int32, tag = "4")]
    pub max_supported_security_version: i32,
}

/// Pairing verification exchange used by the v4 association flow.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VerificationCode {
    #[prost(enumeration = "VerificationCodeState", tag = "1")]
    pub state: i32,

    /// Out-of-band ciphertext when `state` is `OobVerification`, else empty.
    #[prost(bytes = "vec", tag = "2")]
    pub payload: ::prost::alloc::vec::Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ::prost::Enumeration)]
#[repr(i32)]
pub enum VerificationCodeState {
    Unknown = 0,
    VisualVerification = 1,
    VisualConfirmation = 2,
    OobVerification = 3,
}

/// Correlated request envelope for [`OperationType::Query`] traffic.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Query {
    /// Sender-scoped id echoed back in [`QueryResponse::query_id`].
    #[prost(int32, tag = "1")]
    pub id: i32,

    /// UUID bytes of the recipient the response should be routed to.
    #[prost(bytes = "vec", tag = "2")]
    pub sender: ::prost::alloc::vec::Vec<u8>,

    #[prost(bytes = "vec", tag = "3")]
    pub request: ::prost::alloc::vec::Vec<u8>,
}

/// Response envelope for [`OperationType::QueryResponse`] traffic.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct QueryResponse {
    #[prost(int32, tag = "1")]
    pub query_id: i32,

    #[prost(bool, tag = "2")]
    pub is_successful: bool,

    #[prost(bytes = "vec", tag = "3")]
    pub response: ::prost::alloc::vec::Vec<u8>,
}
