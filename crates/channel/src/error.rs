//! Secure channel error taxonomy

use thiserror::Error;

/// Result type for channel operations
pub type Result<T> = std::result::Result<T, ChannelError>;

/// Errors surfaced while establishing or using a secure channel
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("UKey2 could not produce the next handshake message")]
    HandshakeMessageGenerationFailed,

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("Pairing verification failed")]
    VerificationFailed,

    #[error("Cannot encrypt message")]
    EncryptionFailed,

    #[error("Cannot decrypt message")]
    DecryptionFailed,

    #[error("Saved session is invalid")]
    InvalidSavedSession,

    #[error("Cannot resume session: {0}")]
    CannotResumeSession(String),

    #[error("Cannot parse peer handshake message: {0}")]
    ParseMessageFailed(String),

    #[error("Method called out of order")]
    MethodCalledOutOfOrder,

    #[error("Cannot send message over the stream")]
    CannotSendMessage,
}
