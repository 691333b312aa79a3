//! # CarLink Wire Protocol
//!
//! Protobuf message definitions shared by the phone and the head unit.
//!
//! Field numbers are load-bearing: they must match the head unit's copy of
//! the protocol exactly, so the messages are written out by hand with
//! explicit `prost` tags rather than generated from `.proto` sources.
//!
//! ## Message Structure
//!
//! - [`Packet`]: the per-write BLE frame; several packets reassemble into one
//!   [`DeviceMessage`]
//! - [`DeviceMessage`]: the logical payload with operation type, encryption
//!   flag and compression sentinel
//! - [`VersionExchange`]: sent as plain bytes over the characteristics before
//!   any framing exists
//! - [`VerificationCode`]: pairing verification exchange for security v4
//! - [`Query`] / [`QueryResponse`]: correlated request/response envelopes

mod wire;

pub use wire::{
    DeviceMessage, OperationType, Packet, Query, QueryResponse, VerificationCode,
    VerificationCodeState, VersionExchange,
};

pub use prost::Message;
