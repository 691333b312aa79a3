//! Session-level events published to the application layer

use crate::types::{Car, CarId, SecurityVersion};

/// Events emitted by a connection's event loop.
///
/// The application layer consumes these through the session's event channel;
/// none of them require a response.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Version resolution finished and the message stream is up.
    StreamEstablished { security_version: SecurityVersion },

    /// A pairing code needs to be shown to the user for visual confirmation.
    PairingCodeAvailable { code: String },

    /// First-time association completed and credentials were persisted.
    AssociationCompleted { car: Car },

    /// A previously associated car reconnected with a resumed session.
    Reconnected { car: Car },

    /// The current association or reconnection attempt failed.
    AttemptFailed { car_id: Option<CarId>, reason: String },

    /// The peripheral disconnected and the stream was invalidated.
    Disconnected,
}
