//! The ordered, typed message boundary above the framer.
//!
//! One `MessageStream` exists per connection and is owned by that
//! connection's event loop; all calls happen on that single context. The
//! peripheral never learns about the stream — completion callbacks arrive as
//! [`PeripheralEvent`]s and observers consume [`StreamEvent`]s from the
//! stream's channel, so there are no back-references to keep alive.
//!
//! ## Write ordering
//!
//! Pending packets form a stack whose top is the next write. A message's
//! packets go on in reverse so packet 1 surfaces first, and a message queued
//! while another is in flight is spliced in at the bottom: the in-flight
//! message always finishes atomically before the next one starts.

use std::sync::Arc;

use carlink_core::MessageParams;
use carlink_proto::{Message, OperationType, Packet};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::compression;
use crate::framer::{self, FramerError, PacketReassembler};
use crate::message_id::next_message_id;
use crate::peripheral::{ConnectionState, Peripheral, PeripheralEvent};
use crate::MAX_PACKET_SIZE;

/// Result type for stream operations
pub type Result<T> = std::result::Result<T, StreamError>;

/// Errors returned by stream write operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("No encryptor is installed on this stream")]
    NoEncryptorSet,

    #[error("Cannot encrypt message")]
    CannotEncrypt,

    #[error("Cannot decrypt message")]
    CannotDecrypt,

    #[error("Stream was invalidated by a disconnect")]
    StreamInvalidated,

    #[error(transparent)]
    Framer(#[from] FramerError),
}

/// Symmetric transform installed by the secure channel once established.
///
/// `None` from either direction is treated as an encryption failure.
pub trait MessageEncryptor: Send {
    fn encrypt(&self, plaintext: &[u8]) -> Option<Vec<u8>>;
    fn decrypt(&self, ciphertext: &[u8]) -> Option<Vec<u8>>;
}

/// Notifications delivered on the stream's event channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A complete inbound message was reassembled (and decrypted and
    /// decompressed as needed).
    MessageReceived {
        payload: Vec<u8>,
        params: MessageParams,
    },

    /// The final packet of an outbound message was dispatched.
    MessageWritten { recipient: Uuid },

    /// A write for `recipient` failed; the stream itself remains usable.
    WriteError { recipient: Uuid, reason: String },

    /// Protocol desync; the stream is no longer usable.
    UnrecoverableError { reason: String },
}

#[derive(Debug)]
struct QueuedPacket {
    bytes: Vec<u8>,
    message_id: i32,
    is_last: bool,
    recipient: Uuid,
}

/// Reliable, ordered message boundary over a GATT peripheral.
pub struct MessageStream {
    peripheral: Arc<dyn Peripheral>,
    version: carlink_core::StreamVersion,
    reassembler: PacketReassembler,
    /// Pending packets; the last element is the next write.
    write_stack: Vec<QueuedPacket>,
    write_in_flight: bool,
    encryptor: Option<Box<dyn MessageEncryptor>>,
    events: mpsc::UnboundedSender<StreamEvent>,
    valid: bool,
    unrecoverable_reported: bool,
}

impl MessageStream {
    /// Install the stream over a connected peripheral.
    ///
    /// Enables notifications on the read characteristic as a side effect.
    pub fn new(
        peripheral: Arc<dyn Peripheral>,
        version: carlink_core::StreamVersion,
        events: mpsc::UnboundedSender<StreamEvent>,
    ) -> Self {
        if let Err(e) = peripheral.set_notify(true) {
            warn!(peripheral = %peripheral.identifier(), error = %e, "failed to enable notifications");
        }
        Self {
            peripheral,
            version,
            reassembler: PacketReassembler::new(),
            write_stack: Vec::new(),
            write_in_flight: false,
            encryptor: None,
            events,
            valid: true,
            unrecoverable_reported: false,
        }
    }

    pub fn version(&self) -> carlink_core::StreamVersion {
        self.version
    }

    /// False once the peripheral disconnected or the stream hit a fatal
    /// protocol error.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Install the secure channel's encryptor.
    pub fn set_encryptor(&mut self, encryptor: Box<dyn MessageEncryptor>) {
        self.encryptor = Some(encryptor);
    }

    pub fn has_encryptor(&self) -> bool {
        self.encryptor.is_some()
    }

    /// Send `payload` unencrypted (still chunked and, when the stream
    /// version allows, compressed).
    pub fn write_message(&mut self, payload: Vec<u8>, params: MessageParams) -> Result<()> {
        self.write_internal(payload, params, false)
    }

    /// Encrypt `payload` with the installed encryptor, then send it.
    pub fn write_encrypted_message(&mut self, payload: Vec<u8>, params: MessageParams) -> Result<()> {
        self.write_internal(payload, params, true)
    }

    fn write_internal(
        &mut self,
        payload: Vec<u8>,
        params: MessageParams,
        encrypted: bool,
    ) -> Result<()> {
        if !self.valid {
            return Err(StreamError::StreamInvalidated);
        }

        // Compression applies to the plaintext, before any encryption, and
        // only when it actually helps.
        let mut original_size = 0u32;
        let mut body = payload;
        if self.version.supports_compression() {
            if let Ok(input_size) = u32::try_from(body.len()) {
                let compressed = compression::compress(&body)?;
                if compressed.len() < body.len() {
                    debug!(
                        from = body.len(),
                        to = compressed.len(),
                        "compressed outbound payload"
                    );
                    body = compressed;
                    original_size = input_size;
                }
            }
        }

        if encrypted {
            let encryptor = self.encryptor.as_ref().ok_or(StreamError::NoEncryptorSet)?;
            body = encryptor.encrypt(&body).ok_or(StreamError::CannotEncrypt)?;
        }

        // Handshake traffic carries no feature recipient; the proto field
        // still must be present, as empty bytes.
        let recipient_bytes = if params.operation == OperationType::EncryptionHandshake {
            Vec::new()
        } else {
            params.recipient.as_bytes().to_vec()
        };

        let message = framer::make_device_message(
            params.operation,
            body,
            original_size,
            encrypted,
            recipient_bytes,
        );

        let message_id = next_message_id();
        let max_size = self.peripheral.max_write_length().min(MAX_PACKET_SIZE);
        let packets = framer::make_packets(message_id, &message, max_size)?;

        let total = packets.len();
        let mut queued: Vec<QueuedPacket> = packets
            .into_iter()
            .enumerate()
            .map(|(index, packet)| QueuedPacket {
                bytes: packet.encode_to_vec(),
                message_id,
                is_last: index + 1 == total,
                recipient: params.recipient,
            })
            .collect();

        // Reversed so packet 1 ends up closest to the top of its span, then
        // spliced in at the bottom: anything already in flight drains first.
        queued.reverse();
        self.write_stack.splice(0..0, queued);

        self.pump();
        Ok(())
    }

    /// Feed one event from the GATT layer.
    pub fn handle_event(&mut self, event: PeripheralEvent) {
        match event {
            PeripheralEvent::ValueUpdated(bytes) => self.handle_value_update(&bytes),
            PeripheralEvent::ReadyToWrite => {
                self.write_in_flight = false;
                self.pump();
            }
            PeripheralEvent::StateChanged(state) => {
                if state == ConnectionState::Disconnected {
                    debug!(peripheral = %self.peripheral.identifier(), "peripheral disconnected");
                    self.invalidate();
                }
            }
        }
    }

    /// Drop pending writes and reassembly buffers and mark the stream
    /// unusable.
    pub fn invalidate(&mut self) {
        self.valid = false;
        self.write_stack.clear();
        self.reassembler.clear();
    }

    fn pump(&mut self) {
        if self.write_in_flight || !self.valid {
            return;
        }
        let Some(packet) = self.write_stack.pop() else {
            return;
        };

        match self.peripheral.write_value(&packet.bytes) {
            Ok(()) => {
                self.write_in_flight = true;
                if packet.is_last {
                    self.emit(StreamEvent::MessageWritten {
                        recipient: packet.recipient,
                    });
                }
            }
            Err(e) => {
                warn!(recipient = %packet.recipient, error = %e, "write failed");
                // The peer cannot resynchronize a half-delivered message, so
                // the rest of this message is dropped with it.
                self.write_stack
                    .retain(|queued| queued.message_id != packet.message_id);
                self.emit(StreamEvent::WriteError {
                    recipient: packet.recipient,
                    reason: e.to_string(),
                });
                self.pump();
            }
        }
    }

    fn handle_value_update(&mut self, bytes: &[u8]) {
        if !self.valid {
            return;
        }

        let packet = match Packet::decode(bytes) {
            Ok(packet) => packet,
            Err(e) => {
                self.unrecoverable(format!("undecodable packet: {e}"));
                return;
            }
        };

        let message = match self.reassembler.process(packet) {
            Ok(None) => return,
            Ok(Some(message)) => message,
            Err(e) => {
                self.unrecoverable(e.to_string());
                return;
            }
        };

        let operation = message.operation();
        let recipient = if message.recipient.is_empty() {
            Uuid::nil()
        } else {
            match Uuid::from_slice(&message.recipient) {
                Ok(uuid) => uuid,
                Err(_) => {
                    self.unrecoverable(format!(
                        "recipient is {} bytes, expected 16",
                        message.recipient.len()
                    ));
                    return;
                }
            }
        };

        let mut payload = message.payload;
        if message.is_payload_encrypted {
            let Some(encryptor) = self.encryptor.as_ref() else {
                self.unrecoverable("received encrypted message with no encryptor set".to_string());
                return;
            };
            match encryptor.decrypt(&payload) {
                Some(plaintext) => payload = plaintext,
                None => {
                    self.unrecoverable("cannot decrypt message".to_string());
                    return;
                }
            }
        }

        if message.original_size > 0 {
            match compression::decompress(&payload, message.original_size) {
                Ok(decompressed) => payload = decompressed,
                Err(e) => {
                    self.unrecoverable(e.to_string());
                    return;
                }
            }
        }

        self.emit(StreamEvent::MessageReceived {
            payload,
            params: MessageParams::new(recipient, operation),
        });
    }

    fn unrecoverable(&mut self, reason: String) {
        warn!(reason = %reason, "unrecoverable stream error");
        if !self.unrecoverable_reported {
            self.unrecoverable_reported = true;
            self.emit(StreamEvent::UnrecoverableError { reason });
        }
        self.invalidate();
    }

    fn emit(&self, event: StreamEvent) {
        if self.events.send(event).is_err() {
            debug!("stream event receiver dropped");
        }
    }
}
