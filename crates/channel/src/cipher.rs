//! The encryptor handle shared between channel and stream.
//!
//! Once a handshake finishes, the UKey2 instance becomes plain session
//! cipher state. Both the channel (for `save_session`) and the stream (for
//! per-message encryption) need it, so it moves behind a shared handle.

use std::sync::{Arc, Mutex};

use carlink_crypto::Ukey2;
use carlink_transport::MessageEncryptor;

/// Cloneable handle over an established session's cipher.
#[derive(Clone)]
pub enum SessionCipher {
    /// Delegates to UKey2 `encode`/`decode`.
    Ukey2(Arc<Mutex<Box<dyn Ukey2>>>),

    /// Legacy passthrough: both directions are the identity.
    Identity,
}

impl std::fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ukey2(_) => f.write_str("SessionCipher::Ukey2"),
            Self::Identity => f.write_str("SessionCipher::Identity"),
        }
    }
}

impl SessionCipher {
    pub fn from_ukey2(ukey2: Box<dyn Ukey2>) -> Self {
        Self::Ukey2(Arc::new(Mutex::new(ukey2)))
    }

    pub fn encode(&self, message: &[u8]) -> Option<Vec<u8>> {
        match self {
            Self::Ukey2(ukey2) => ukey2.lock().ok()?.encode(message),
            Self::Identity => Some(message.to_vec()),
        }
    }

    pub fn decode(&self, message: &[u8]) -> Option<Vec<u8>> {
        match self {
            Self::Ukey2(ukey2) => ukey2.lock().ok()?.decode(message),
            Self::Identity => Some(message.to_vec()),
        }
    }

    /// Serialize the underlying session, if the cipher has one.
    pub fn save_session(&self) -> Option<Vec<u8>> {
        match self {
            Self::Ukey2(ukey2) => ukey2.lock().ok()?.save_session(),
            Self::Identity => None,
        }
    }

    /// The session's unique key, if the cipher has one.
    pub fn unique_session_key(&self) -> Option<Vec<u8>> {
        match self {
            Self::Ukey2(ukey2) => ukey2.lock().ok()?.unique_session_key(),
            Self::Identity => None,
        }
    }
}

impl MessageEncryptor for SessionCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Option<Vec<u8>> {
        self.encode(plaintext)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Option<Vec<u8>> {
        self.decode(ciphertext)
    }
}
