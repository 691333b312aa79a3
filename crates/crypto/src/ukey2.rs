//! The UKey2 driving surface.
//!
//! UKey2 is an authenticated Diffie–Hellman key agreement producing a shared
//! session key and a short verification string. The primitive itself is an
//! injected library; the secure channel only needs the operations below.

use thiserror::Error;

/// Errors reported by the UKey2 primitive
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Ukey2Error {
    #[error("Handshake message rejected: {0}")]
    ParseFailed(String),

    #[error("Operation invalid in handshake state {0:?}")]
    WrongState(HandshakeState),
}

/// Internal handshake progression of the primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    InProgress,
    VerificationNeeded,
    VerificationInProgress,
    Finished,
    Error,
}

/// Which side of the key agreement this endpoint plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ukey2Role {
    /// The phone opens the handshake.
    Initiator,
    Responder,
}

/// One UKey2 handshake instance.
///
/// Operations returning `Option` yield `None` when the primitive refused the
/// call in its current state; the driver maps that to its own error
/// taxonomy.
pub trait Ukey2: Send {
    fn handshake_state(&self) -> HandshakeState;

    /// Advance the handshake and produce the next outbound message.
    fn next_handshake_message(&mut self) -> Option<Vec<u8>>;

    /// Consume one inbound handshake message.
    fn parse_handshake_message(&mut self, message: &[u8]) -> Result<(), Ukey2Error>;

    /// Fetch the out-of-band verification bytes.
    ///
    /// Must be called to move the primitive past `VerificationNeeded`. Real
    /// implementations return a full 32 bytes regardless of `length`; the
    /// caller slices what it needs.
    fn verification_data(&mut self, length: usize) -> Option<Vec<u8>>;

    /// Confirm the verification string matched; `true` completes the
    /// handshake.
    fn verify_handshake(&mut self) -> bool;

    /// Encrypt one message with the session key.
    fn encode(&self, message: &[u8]) -> Option<Vec<u8>>;

    /// Decrypt one message with the session key.
    fn decode(&self, message: &[u8]) -> Option<Vec<u8>>;

    /// Key uniquely identifying this session, available once finished.
    fn unique_session_key(&self) -> Option<Vec<u8>>;

    /// Serialize the completed session for later resumption.
    fn save_session(&self) -> Option<Vec<u8>>;
}

/// Factory for UKey2 instances.
///
/// Injected into the channel so the driving logic stays independent of the
/// concrete primitive.
pub trait Ukey2Provider: Send + Sync {
    fn new_handshake(&self, role: Ukey2Role) -> Box<dyn Ukey2>;

    /// Reconstruct a session from a blob produced by [`Ukey2::save_session`].
    fn from_saved(&self, saved: &[u8]) -> Option<Box<dyn Ukey2>>;
}
