//! Pairing-code derivation.
//!
//! Both peers derive the same short decimal code from the handshake's
//! verification bytes; the user confirms they match on phone and head-unit
//! screens.

/// Number of decimal digits shown to the user.
pub const PAIRING_CODE_LENGTH: usize = 6;

/// Verification material handed to the association flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationToken {
    /// Raw verification bytes from the handshake.
    pub data: Vec<u8>,

    /// The 6-digit code derived from `data`.
    pub pairing_code: String,
}

impl VerificationToken {
    /// Wrap verification bytes, deriving the user-facing code.
    ///
    /// Returns `None` when `data` is shorter than [`PAIRING_CODE_LENGTH`].
    pub fn new(data: Vec<u8>) -> Option<Self> {
        let pairing_code = pairing_code_from_bytes(&data)?;
        Some(Self { data, pairing_code })
    }
}

/// Derive the code: digit `i` is `data[i] mod 10`.
pub fn pairing_code_from_bytes(data: &[u8]) -> Option<String> {
    if data.len() < PAIRING_CODE_LENGTH {
        return None;
    }
    Some(
        data[..PAIRING_CODE_LENGTH]
            .iter()
            .map(|byte| char::from(b'0' + byte % 10))
            .collect(),
    )
}
