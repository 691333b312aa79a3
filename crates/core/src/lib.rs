//! # CarLink Core
//!
//! Common types shared across all CarLink crates.
//!
//! ## Module Structure
//!
//! - `types`: Core type definitions (CarId, Car, DeviceId, MessageParams, versions)
//! - `events`: Session-level events published to the application layer

pub mod events;
pub mod types;

pub use types::{Car, CarId, DeviceId, MessageParams, SecurityVersion, StreamVersion};
