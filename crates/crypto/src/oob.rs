//! Out-of-band verification token.
//!
//! When the phone and head unit share a key over some other channel (NFC
//! tap, QR code), the v4 association flow verifies the handshake by
//! encrypting the verification bytes with that key instead of showing the
//! user a visual code. ChaCha20-Poly1305 with a random nonce; the nonce is
//! carried in front of the ciphertext.

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use rand::Rng;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Nonce size in bytes (96 bits)
const NONCE_SIZE: usize = 12;

/// Key size in bytes
pub const OOB_KEY_SIZE: usize = 32;

/// Context binding for token ciphertexts.
const OOB_AAD: &[u8] = b"carlink-oob-v1";

/// A pre-shared key used to verify the handshake without a visual code.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct OobToken {
    key: [u8; OOB_KEY_SIZE],
}

impl OobToken {
    /// Wrap key material exchanged out of band.
    ///
    /// Returns `None` unless the key is exactly [`OOB_KEY_SIZE`] bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != OOB_KEY_SIZE {
            return None;
        }
        let mut key = [0u8; OOB_KEY_SIZE];
        key.copy_from_slice(bytes);
        Some(Self { key })
    }

    /// Generate a fresh token for sharing out of band.
    pub fn generate() -> Self {
        let mut key = [0u8; OOB_KEY_SIZE];
        rand::thread_rng().fill(&mut key);
        Self { key }
    }

    /// Encrypt verification bytes; output is `nonce || ciphertext`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Option<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let cipher = ChaCha20Poly1305::new((&self.key).into());
        let ciphertext = cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext,
                    aad: OOB_AAD,
                },
            )
            .ok()?;

        let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        output.extend_from_slice(&nonce_bytes);
        output.extend_from_slice(&ciphertext);
        Some(output)
    }

    /// Decrypt a `nonce || ciphertext` blob produced with the same token.
    pub fn decrypt(&self, data: &[u8]) -> Option<Vec<u8>> {
        if data.len() <= NONCE_SIZE {
            return None;
        }
        let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let cipher = ChaCha20Poly1305::new((&self.key).into());
        cipher
            .decrypt(
                nonce,
                Payload {
                    msg: ciphertext,
                    aad: OOB_AAD,
                },
            )
            .ok()
    }
}

impl std::fmt::Debug for OobToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OobToken")
            .field("key", &"[REDACTED]")
            .finish()
    }
}
