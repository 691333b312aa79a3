//! Packet framing: chunking outbound payloads and reassembling inbound ones.
//!
//! Outbound, a serialized [`DeviceMessage`] is sliced into [`Packet`]s whose
//! serialized form fits the peripheral's per-write budget. Inbound, packets
//! sharing a `message_id` accumulate until the final one arrives; duplicates
//! are tolerated, any other ordering violation is fatal to the stream.

use std::collections::HashMap;

use carlink_proto::{DeviceMessage, Message, OperationType, Packet};
use thiserror::Error;
use tracing::{debug, warn};

/// Result type for framer operations
pub type Result<T> = std::result::Result<T, FramerError>;

/// Framing and reassembly errors.
///
/// All of these signal a protocol desync and are fatal to the stream.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FramerError {
    #[error("Payload cannot be chunked to fit {max_size} byte writes")]
    PayloadTooLarge { max_size: usize },

    #[error("Cannot serialize or deserialize a wire message: {0}")]
    CannotSerialize(String),

    #[error("Cannot decompress payload: {0}")]
    CannotDecompress(String),

    #[error(
        "Out-of-order packet for message {message_id}: got {packet_number} after {last_packet_number}"
    )]
    OutOfOrderPacket {
        message_id: i32,
        packet_number: u32,
        last_packet_number: u32,
    },
}

/// Serialized size of `packet_number`: one tag byte plus four fixed32 bytes.
const PACKET_NUMBER_WIRE_SIZE: usize = 5;

/// Upper bound on the varint width of `total_packets` worth probing.
///
/// Five varint bytes already cover every positive i32.
const MAX_TOTAL_PACKETS_VARINT_SIZE: usize = 5;

/// Number of bytes the protobuf varint encoding of `value` occupies.
fn varint_size(value: u64) -> usize {
    let mut size = 1;
    let mut remaining = value >> 7;
    while remaining != 0 {
        size += 1;
        remaining >>= 7;
    }
    size
}

/// Wire size of an `int32` field value. Negative values sign-extend to ten
/// varint bytes.
fn int32_varint_size(value: i32) -> usize {
    if value < 0 {
        10
    } else {
        varint_size(value as u64)
    }
}

/// Build the [`DeviceMessage`] wire form for one logical payload.
pub fn make_device_message(
    operation: OperationType,
    payload: Vec<u8>,
    original_size: u32,
    is_payload_encrypted: bool,
    recipient: Vec<u8>,
) -> DeviceMessage {
    DeviceMessage {
        operation: operation as i32,
        is_payload_encrypted,
        payload,
        original_size,
        recipient,
    }
}

/// Split a [`DeviceMessage`] into packets whose serialized form fits
/// `max_size` bytes.
///
/// The concatenated payloads of the result, decoded as a `DeviceMessage`,
/// equal the input. Fails with [`FramerError::PayloadTooLarge`] when no
/// chunking fits an i32 packet count.
pub fn make_packets(message_id: i32, message: &DeviceMessage, max_size: usize) -> Result<Vec<Packet>> {
    let body = message.encode_to_vec();

    // Fixed per-packet overhead: packet_number, message_id and the payload
    // field's tag + length prefix. The payload length is bounded by max_size,
    // so its varint width is sized for the worst case.
    let header_size = PACKET_NUMBER_WIRE_SIZE
        + 1
        + int32_varint_size(message_id)
        + 1
        + varint_size(max_size as u64);

    // total_packets is itself a varint whose width depends on its value, so
    // probe each hypothesis until one is self-consistent.
    for total_packets_varint_size in 1..=MAX_TOTAL_PACKETS_VARINT_SIZE {
        let overhead = header_size + total_packets_varint_size + 1;
        if max_size <= overhead {
            return Err(FramerError::PayloadTooLarge { max_size });
        }

        let max_payload = max_size - overhead;
        let total = body.len().div_ceil(max_payload).max(1);
        if total > i32::MAX as usize {
            return Err(FramerError::PayloadTooLarge { max_size });
        }
        if varint_size(total as u64) != total_packets_varint_size {
            continue;
        }

        let mut packets = Vec::with_capacity(total);
        for (index, chunk) in body.chunks(max_payload).enumerate() {
            packets.push(Packet {
                packet_number: index as u32 + 1,
                total_packets: total as i32,
                message_id,
                payload: chunk.to_vec(),
            });
        }
        if packets.is_empty() {
            // A DeviceMessage whose fields are all defaults encodes to zero
            // bytes; it still travels as one empty packet.
            packets.push(Packet {
                packet_number: 1,
                total_packets: 1,
                message_id,
                payload: Vec::new(),
            });
        }

        debug!(
            message_id,
            total_packets = total,
            body_len = body.len(),
            "chunked outbound message"
        );
        return Ok(packets);
    }

    Err(FramerError::PayloadTooLarge { max_size })
}

#[derive(Debug)]
struct PendingMessage {
    payload: Vec<u8>,
    last_packet_number: u32,
    total_packets: i32,
}

/// Reassembles inbound packets into [`DeviceMessage`]s.
///
/// Keeps one buffer per in-flight `message_id`. Duplicate deliveries of the
/// last-seen packet are ignored; any other gap is a fatal
/// [`FramerError::OutOfOrderPacket`].
#[derive(Debug, Default)]
pub struct PacketReassembler {
    pending: HashMap<i32, PendingMessage>,
}

impl PacketReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one inbound packet.
    ///
    /// Returns the completed [`DeviceMessage`] exactly when `packet` is the
    /// final packet of its message, `None` otherwise.
    pub fn process(&mut self, packet: Packet) -> Result<Option<DeviceMessage>> {
        let message_id = packet.message_id;

        match self.pending.get_mut(&message_id) {
            None => {
                if packet.packet_number == 1 {
                    self.pending.insert(
                        message_id,
                        PendingMessage {
                            payload: packet.payload,
                            last_packet_number: 1,
                            total_packets: packet.total_packets,
                        },
                    );
                } else if packet.packet_number as i64 == packet.total_packets as i64 {
                    // The message already completed and was delivered; its
                    // final packet came around again.
                    debug!(message_id, "ignoring duplicate last packet");
                    return Ok(None);
                } else {
                    warn!(
                        message_id,
                        packet_number = packet.packet_number,
                        "first packet of a new message is not packet 1"
                    );
                    return Err(FramerError::OutOfOrderPacket {
                        message_id,
                        packet_number: packet.packet_number,
                        last_packet_number: 0,
                    });
                }
            }
            Some(entry) => {
                if packet.total_packets != entry.total_packets {
                    warn!(
                        message_id,
                        expected = entry.total_packets,
                        got = packet.total_packets,
                        "total_packets changed mid-message"
                    );
                    return Err(FramerError::OutOfOrderPacket {
                        message_id,
                        packet_number: packet.packet_number,
                        last_packet_number: entry.last_packet_number,
                    });
                }

                if packet.packet_number == entry.last_packet_number {
                    debug!(
                        message_id,
                        packet_number = packet.packet_number,
                        "ignoring duplicate packet"
                    );
                    return Ok(None);
                }

                if packet.packet_number != entry.last_packet_number + 1 {
                    return Err(FramerError::OutOfOrderPacket {
                        message_id,
                        packet_number: packet.packet_number,
                        last_packet_number: entry.last_packet_number,
                    });
                }

                entry.payload.extend_from_slice(&packet.payload);
                entry.last_packet_number = packet.packet_number;
            }
        }

        let complete = self
            .pending
            .get(&message_id)
            .is_some_and(|entry| entry.last_packet_number as i64 == entry.total_packets as i64);
        if !complete {
            return Ok(None);
        }

        // Entry presence was just checked; remove returns it.
        let Some(entry) = self.pending.remove(&message_id) else {
            return Ok(None);
        };
        let message = DeviceMessage::decode(entry.payload.as_slice())
            .map_err(|e| FramerError::CannotSerialize(e.to_string()))?;
        Ok(Some(message))
    }

    /// Drop all partially reassembled messages.
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Number of messages currently mid-reassembly.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
