//! Association and reconnection error taxonomies

use carlink_channel::ChannelError;
use thiserror::Error;

/// Errors that abort a first-time association attempt
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AssociationError {
    #[error("Received car id is malformed")]
    MalformedCarId,

    #[error("Failed to persist the authentication key")]
    AuthenticationKeyStorageFailed,

    #[error("Pairing verification was rejected")]
    PairingCodeRejected,

    #[error("Failed to deliver association credentials to the head unit")]
    CannotStoreAssociation,

    #[error("Association failed: {0}")]
    Unknown(String),

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Errors that abort a reconnection attempt
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReconnectionError {
    #[error("Advertisement does not match any associated car")]
    UnassociatedCar,

    #[error("Unexpected message during reconnection")]
    InvalidMessage,

    #[error(transparent)]
    Channel(#[from] ChannelError),
}
