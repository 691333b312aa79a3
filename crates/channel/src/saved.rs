//! Persisted session blob.
//!
//! What resumption needs from a completed handshake: the primitive's own
//! serialized state and the session key it derived. Packed with ciborium so
//! the credential store only ever sees opaque bytes.

use serde::{Deserialize, Serialize};

use crate::error::{ChannelError, Result};

/// A secure session captured for later resumption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedSession {
    /// UKey2's serialized session state.
    pub ukey2_blob: Vec<u8>,

    /// The `unique_session_key` derived when the handshake completed.
    pub unique_session_key: Vec<u8>,
}

impl SavedSession {
    pub fn new(ukey2_blob: Vec<u8>, unique_session_key: Vec<u8>) -> Self {
        Self {
            ukey2_blob,
            unique_session_key,
        }
    }

    /// Pack for the credential store.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes).map_err(|_| ChannelError::InvalidSavedSession)?;
        Ok(bytes)
    }

    /// Unpack a blob previously produced by [`SavedSession::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|_| ChannelError::InvalidSavedSession)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let session = SavedSession::new(vec![1, 2, 3, 4], vec![5; 32]);
        let bytes = session.to_bytes().unwrap();
        assert_eq!(SavedSession::from_bytes(&bytes).unwrap(), session);
    }

    #[test]
    fn garbage_is_invalid() {
        assert_eq!(
            SavedSession::from_bytes(&[0xFF, 0x00, 0x13]).unwrap_err(),
            ChannelError::InvalidSavedSession
        );
        assert_eq!(
            SavedSession::from_bytes(&[]).unwrap_err(),
            ChannelError::InvalidSavedSession
        );
    }
}
