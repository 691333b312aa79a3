//! # CarLink Crypto
//!
//! The cryptographic surface the secure channel drives: the black-box UKey2
//! trait, pairing-code derivation, session-resumption key derivation and the
//! out-of-band verification token.
//!
//! The UKey2 key agreement itself is an injected primitive — this crate only
//! defines the operations the channel needs from it, plus a deterministic
//! fake (behind the `test-util` feature) for exercising the driving logic
//! without the real library.
//!
//! ## Module Structure
//!
//! - `ukey2`: handshake states and the `Ukey2`/`Ukey2Provider` traits
//! - `pairing`: 6-digit verification code derivation
//! - `resume`: HKDF derivation for session resumption HMACs
//! - `oob`: pre-shared out-of-band token AEAD

pub mod oob;
pub mod pairing;
pub mod resume;
pub mod ukey2;

#[cfg(any(test, feature = "test-util"))]
pub mod fake;

pub use oob::OobToken;
pub use pairing::{VerificationToken, PAIRING_CODE_LENGTH};
pub use resume::{derive_resumption_hmacs, ResumptionHmacs};
pub use ukey2::{HandshakeState, Ukey2, Ukey2Error, Ukey2Provider, Ukey2Role};
