//! Deterministic in-memory UKey2 for tests.
//!
//! Implements the [`Ukey2`] surface with a toy exchange: each side
//! contributes 32 random bytes, the shared secret is their XOR, and
//! encode/decode run a hash-block keystream over it. Two instances that saw
//! each other's handshake message interoperate, which is all the channel and
//! association tests need. Not a cipher — never leaves test builds.

use rand::Rng;
use sha2::{Digest, Sha256};

use crate::ukey2::{HandshakeState, Ukey2, Ukey2Error, Ukey2Provider, Ukey2Role};

const CONTRIBUTION_SIZE: usize = 32;

/// Fake handshake instance.
pub struct FakeUkey2 {
    role: Ukey2Role,
    local: [u8; CONTRIBUTION_SIZE],
    remote: Option<[u8; CONTRIBUTION_SIZE]>,
    sent_local: bool,
    state: HandshakeState,
}

impl FakeUkey2 {
    pub fn new(role: Ukey2Role) -> Self {
        let mut local = [0u8; CONTRIBUTION_SIZE];
        rand::thread_rng().fill(&mut local);
        Self {
            role,
            local,
            remote: None,
            sent_local: false,
            state: HandshakeState::InProgress,
        }
    }

    pub fn role(&self) -> Ukey2Role {
        self.role
    }

    fn restore(saved: &[u8]) -> Option<Self> {
        if saved.len() != CONTRIBUTION_SIZE * 2 {
            return None;
        }
        let mut local = [0u8; CONTRIBUTION_SIZE];
        let mut remote = [0u8; CONTRIBUTION_SIZE];
        local.copy_from_slice(&saved[..CONTRIBUTION_SIZE]);
        remote.copy_from_slice(&saved[CONTRIBUTION_SIZE..]);
        Some(Self {
            role: Ukey2Role::Initiator,
            local,
            remote: Some(remote),
            sent_local: true,
            state: HandshakeState::Finished,
        })
    }

    fn shared_secret(&self) -> Option<[u8; CONTRIBUTION_SIZE]> {
        let remote = self.remote?;
        let mut shared = [0u8; CONTRIBUTION_SIZE];
        for (index, byte) in shared.iter_mut().enumerate() {
            *byte = self.local[index] ^ remote[index];
        }
        Some(shared)
    }

    fn apply_keystream(&self, message: &[u8]) -> Option<Vec<u8>> {
        let shared = self.shared_secret()?;
        let mut output = Vec::with_capacity(message.len());
        for (block_index, block) in message.chunks(CONTRIBUTION_SIZE).enumerate() {
            let mut hasher = Sha256::new();
            hasher.update(shared);
            hasher.update((block_index as u64).to_le_bytes());
            let keystream = hasher.finalize();
            output.extend(block.iter().zip(keystream.iter()).map(|(m, k)| m ^ k));
        }
        Some(output)
    }
}

impl Ukey2 for FakeUkey2 {
    fn handshake_state(&self) -> HandshakeState {
        self.state
    }

    fn next_handshake_message(&mut self) -> Option<Vec<u8>> {
        if self.state != HandshakeState::InProgress || self.sent_local {
            return None;
        }
        self.sent_local = true;
        if self.remote.is_some() {
            self.state = HandshakeState::VerificationNeeded;
        }
        Some(self.local.to_vec())
    }

    fn parse_handshake_message(&mut self, message: &[u8]) -> Result<(), Ukey2Error> {
        if self.state != HandshakeState::InProgress {
            return Err(Ukey2Error::WrongState(self.state));
        }
        if message.len() != CONTRIBUTION_SIZE {
            self.state = HandshakeState::Error;
            return Err(Ukey2Error::ParseFailed(format!(
                "expected {CONTRIBUTION_SIZE} bytes, got {}",
                message.len()
            )));
        }
        let mut remote = [0u8; CONTRIBUTION_SIZE];
        remote.copy_from_slice(message);
        self.remote = Some(remote);
        if self.sent_local {
            self.state = HandshakeState::VerificationNeeded;
        }
        Ok(())
    }

    fn verification_data(&mut self, _length: usize) -> Option<Vec<u8>> {
        // Like the real primitive: always 32 bytes, whatever was requested.
        if self.state != HandshakeState::VerificationNeeded {
            return None;
        }
        let shared = self.shared_secret()?;
        self.state = HandshakeState::VerificationInProgress;
        let mut hasher = Sha256::new();
        hasher.update(b"verify");
        hasher.update(shared);
        Some(hasher.finalize().to_vec())
    }

    fn verify_handshake(&mut self) -> bool {
        if self.state != HandshakeState::VerificationInProgress {
            return false;
        }
        self.state = HandshakeState::Finished;
        true
    }

    fn encode(&self, message: &[u8]) -> Option<Vec<u8>> {
        if self.state != HandshakeState::Finished {
            return None;
        }
        self.apply_keystream(message)
    }

    fn decode(&self, message: &[u8]) -> Option<Vec<u8>> {
        if self.state != HandshakeState::Finished {
            return None;
        }
        self.apply_keystream(message)
    }

    fn unique_session_key(&self) -> Option<Vec<u8>> {
        if self.state != HandshakeState::Finished {
            return None;
        }
        let shared = self.shared_secret()?;
        let mut hasher = Sha256::new();
        hasher.update(b"unique");
        hasher.update(shared);
        Some(hasher.finalize().to_vec())
    }

    fn save_session(&self) -> Option<Vec<u8>> {
        if self.state != HandshakeState::Finished {
            return None;
        }
        let remote = self.remote?;
        let mut saved = Vec::with_capacity(CONTRIBUTION_SIZE * 2);
        saved.extend_from_slice(&self.local);
        saved.extend_from_slice(&remote);
        Some(saved)
    }
}

/// Provider handing out [`FakeUkey2`] instances.
#[derive(Debug, Default, Clone, Copy)]
pub struct FakeUkey2Provider;

impl Ukey2Provider for FakeUkey2Provider {
    fn new_handshake(&self, role: Ukey2Role) -> Box<dyn Ukey2> {
        Box::new(FakeUkey2::new(role))
    }

    fn from_saved(&self, saved: &[u8]) -> Option<Box<dyn Ukey2>> {
        FakeUkey2::restore(saved).map(|fake| Box::new(fake) as Box<dyn Ukey2>)
    }
}

/// Run two fakes through a complete handshake, up to `Finished` on both.
///
/// Convenience for tests that need an established pair without driving the
/// message exchange themselves.
pub fn handshaken_pair() -> (FakeUkey2, FakeUkey2) {
    let mut initiator = FakeUkey2::new(Ukey2Role::Initiator);
    let mut responder = FakeUkey2::new(Ukey2Role::Responder);

    let first = initiator
        .next_handshake_message()
        .expect("initiator opens the handshake");
    responder
        .parse_handshake_message(&first)
        .expect("responder accepts");
    let second = responder
        .next_handshake_message()
        .expect("responder replies");
    initiator
        .parse_handshake_message(&second)
        .expect("initiator accepts");

    for side in [&mut initiator, &mut responder] {
        assert_eq!(side.handshake_state(), HandshakeState::VerificationNeeded);
        side.verification_data(6).expect("verification data");
        assert!(side.verify_handshake());
    }

    (initiator, responder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_reaches_finished_on_both_sides() {
        let (initiator, responder) = handshaken_pair();
        assert_eq!(initiator.handshake_state(), HandshakeState::Finished);
        assert_eq!(responder.handshake_state(), HandshakeState::Finished);
    }

    #[test]
    fn both_sides_derive_the_same_verification_data() {
        let mut initiator = FakeUkey2::new(Ukey2Role::Initiator);
        let mut responder = FakeUkey2::new(Ukey2Role::Responder);

        let first = initiator.next_handshake_message().unwrap();
        responder.parse_handshake_message(&first).unwrap();
        let second = responder.next_handshake_message().unwrap();
        initiator.parse_handshake_message(&second).unwrap();

        let initiator_data = initiator.verification_data(6).unwrap();
        let responder_data = responder.verification_data(6).unwrap();
        assert_eq!(initiator_data, responder_data);
        assert_eq!(initiator_data.len(), 32);
    }

    #[test]
    fn encode_decode_interoperate() {
        let (initiator, responder) = handshaken_pair();
        let message = b"feature payload bytes".to_vec();

        let ciphertext = initiator.encode(&message).unwrap();
        assert_ne!(ciphertext, message);
        assert_eq!(responder.decode(&ciphertext).unwrap(), message);

        let reply = responder.encode(b"reply").unwrap();
        assert_eq!(initiator.decode(&reply).unwrap(), b"reply");
    }

    #[test]
    fn long_messages_survive_multiple_keystream_blocks() {
        let (initiator, responder) = handshaken_pair();
        let message = vec![0x42u8; 1000];
        let ciphertext = initiator.encode(&message).unwrap();
        assert_eq!(responder.decode(&ciphertext).unwrap(), message);
    }

    #[test]
    fn save_and_restore_interoperate_with_the_peer() {
        let (initiator, responder) = handshaken_pair();
        let saved = initiator.save_session().unwrap();

        let provider = FakeUkey2Provider;
        let restored = provider.from_saved(&saved).unwrap();

        let ciphertext = restored.encode(b"after resume").unwrap();
        assert_eq!(responder.decode(&ciphertext).unwrap(), b"after resume");
        assert_eq!(
            restored.unique_session_key(),
            initiator.unique_session_key()
        );
    }

    #[test]
    fn restore_rejects_bad_blobs() {
        let provider = FakeUkey2Provider;
        assert!(provider.from_saved(&[]).is_none());
        assert!(provider.from_saved(&[0u8; 63]).is_none());
        assert!(provider.from_saved(&[0u8; 65]).is_none());
    }

    #[test]
    fn operations_refuse_wrong_states() {
        let mut fresh = FakeUkey2::new(Ukey2Role::Initiator);
        assert!(fresh.encode(b"x").is_none());
        assert!(fresh.decode(b"x").is_none());
        assert!(fresh.unique_session_key().is_none());
        assert!(fresh.save_session().is_none());
        assert!(fresh.verification_data(6).is_none());
        assert!(!fresh.verify_handshake());

        // Only one outbound message per side.
        assert!(fresh.next_handshake_message().is_some());
        assert!(fresh.next_handshake_message().is_none());
    }

    #[test]
    fn malformed_handshake_message_errors_the_state() {
        let mut responder = FakeUkey2::new(Ukey2Role::Responder);
        let err = responder.parse_handshake_message(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, Ukey2Error::ParseFailed(_)));
        assert_eq!(responder.handshake_state(), HandshakeState::Error);
    }
}
