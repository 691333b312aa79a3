//! # CarLink Session
//!
//! The top of the device-side stack: association and reconnection state
//! machines, the per-connection event loop that wires resolver → stream →
//! secure channel → helper together, and the [`SecuredChannel`] handed to
//! feature managers once a connection is authenticated.
//!
//! ## Module Structure
//!
//! - `association`: first-time pairing helpers (v2/v3/v4 flows)
//! - `reconnection`: advertisement matching and session resumption
//! - `connection`: the event loop owning all per-connection state
//! - `secured_channel`: the application-facing messaging surface
//! - `error`: association and reconnection error taxonomies

pub mod association;
pub mod connection;
pub mod error;
pub mod reconnection;
pub mod secured_channel;

pub use association::{AssociationHelper, HelperAction};
pub use connection::{ConnectionDriver, ConnectionMode};
pub use error::{AssociationError, ReconnectionError};
pub use reconnection::{advertisement_for, match_advertisement, ReconnectionHelper};
pub use secured_channel::{ChannelCommand, SecuredChannel, SecuredChannelError};
