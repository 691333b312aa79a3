//! The UKey2-driving secure channel.
//!
//! State machine: `Uninitialized → InProgress → VerificationNeeded →
//! (Established | ResumingSession → Established) | Failed`. Every transition
//! is triggered by an inbound stream message or an explicit call; outbound
//! traffic comes back to the caller as [`ChannelAction`]s.

use carlink_crypto::{
    derive_resumption_hmacs, HandshakeState, Ukey2, Ukey2Provider, Ukey2Role, VerificationToken,
    PAIRING_CODE_LENGTH,
};
use tracing::{debug, info, warn};

use crate::cipher::SessionCipher;
use crate::error::{ChannelError, Result};
use crate::saved::SavedSession;

/// What the owner must do after feeding the channel an event
#[derive(Debug)]
pub enum ChannelAction {
    /// Write these bytes over the stream with handshake params.
    SendHandshakeMessage(Vec<u8>),

    /// Surface the pairing verification to the association flow.
    RequiresVerification(VerificationToken),

    /// The channel is established; install its encryptor on the stream.
    Established,
}

/// Driver states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Uninitialized,
    InProgress,
    VerificationNeeded,
    ResumingSession,
    Established,
    Failed,
}

struct ResumptionContext {
    previous_key: Vec<u8>,
    expected_server_hmac: Option<[u8; 32]>,
}

/// Secure channel over an injected UKey2 primitive.
pub struct Ukey2Channel {
    ukey2: Option<Box<dyn Ukey2>>,
    cipher: Option<SessionCipher>,
    resumption: Option<ResumptionContext>,
    state: ChannelState,
}

impl Ukey2Channel {
    pub fn new() -> Self {
        Self {
            ukey2: None,
            cipher: None,
            resumption: None,
            state: ChannelState::Uninitialized,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// The encryptor to install on the stream, once established.
    pub fn encryptor(&self) -> Option<SessionCipher> {
        self.cipher.clone()
    }

    /// Open a fresh handshake as the initiator.
    pub fn establish(&mut self, provider: &dyn Ukey2Provider) -> Result<Vec<ChannelAction>> {
        if self.state != ChannelState::Uninitialized {
            return Err(ChannelError::MethodCalledOutOfOrder);
        }

        let mut ukey2 = provider.new_handshake(Ukey2Role::Initiator);
        let Some(message) = ukey2.next_handshake_message() else {
            self.state = ChannelState::Failed;
            return Err(ChannelError::HandshakeMessageGenerationFailed);
        };

        self.ukey2 = Some(ukey2);
        self.state = ChannelState::InProgress;
        debug!("opened fresh handshake");
        Ok(vec![ChannelAction::SendHandshakeMessage(message)])
    }

    /// Open a handshake that will resume `saved` instead of prompting for
    /// pairing confirmation.
    pub fn establish_with_saved_session(
        &mut self,
        provider: &dyn Ukey2Provider,
        saved: &SavedSession,
    ) -> Result<Vec<ChannelAction>> {
        if self.state != ChannelState::Uninitialized {
            return Err(ChannelError::MethodCalledOutOfOrder);
        }
        if saved.ukey2_blob.is_empty() || saved.unique_session_key.is_empty() {
            return Err(ChannelError::InvalidSavedSession);
        }

        self.resumption = Some(ResumptionContext {
            previous_key: saved.unique_session_key.clone(),
            expected_server_hmac: None,
        });
        let actions = self.establish(provider)?;
        debug!("opened resuming handshake");
        Ok(actions)
    }

    /// Feed one inbound message addressed to the secure channel.
    pub fn handle_message(&mut self, payload: &[u8]) -> Result<Vec<ChannelAction>> {
        match self.state {
            ChannelState::InProgress => self.drive_handshake(payload),
            ChannelState::ResumingSession => self.check_resumption_proof(payload),
            _ => Err(ChannelError::MethodCalledOutOfOrder),
        }
    }

    /// The upper layer confirmed the pairing code matched.
    pub fn notify_pairing_code_accepted(&mut self) -> Result<Vec<ChannelAction>> {
        if self.state != ChannelState::VerificationNeeded {
            return Err(ChannelError::MethodCalledOutOfOrder);
        }
        let Some(mut ukey2) = self.ukey2.take() else {
            return Err(ChannelError::MethodCalledOutOfOrder);
        };

        if !ukey2.verify_handshake() || ukey2.handshake_state() != HandshakeState::Finished {
            warn!("handshake verification failed");
            self.state = ChannelState::Failed;
            return Err(ChannelError::VerificationFailed);
        }

        self.cipher = Some(SessionCipher::from_ukey2(ukey2));
        self.state = ChannelState::Established;
        info!("secure channel established");
        Ok(vec![ChannelAction::Established])
    }

    /// Encrypt with the established session.
    pub fn encrypt(&self, message: &[u8]) -> Result<Vec<u8>> {
        if self.state != ChannelState::Established {
            return Err(ChannelError::MethodCalledOutOfOrder);
        }
        self.cipher
            .as_ref()
            .and_then(|cipher| cipher.encode(message))
            .ok_or(ChannelError::EncryptionFailed)
    }

    /// Decrypt with the established session.
    pub fn decrypt(&self, message: &[u8]) -> Result<Vec<u8>> {
        if self.state != ChannelState::Established {
            return Err(ChannelError::MethodCalledOutOfOrder);
        }
        self.cipher
            .as_ref()
            .and_then(|cipher| cipher.decode(message))
            .ok_or(ChannelError::DecryptionFailed)
    }

    /// Capture the established session for later resumption.
    pub fn save_session(&self) -> Result<SavedSession> {
        if self.state != ChannelState::Established {
            return Err(ChannelError::MethodCalledOutOfOrder);
        }
        let cipher = self.cipher.as_ref().ok_or(ChannelError::InvalidSavedSession)?;
        let blob = cipher.save_session().ok_or(ChannelError::InvalidSavedSession)?;
        let key = cipher
            .unique_session_key()
            .ok_or(ChannelError::InvalidSavedSession)?;
        Ok(SavedSession::new(blob, key))
    }

    fn drive_handshake(&mut self, payload: &[u8]) -> Result<Vec<ChannelAction>> {
        let Some(mut ukey2) = self.ukey2.take() else {
            return Err(ChannelError::MethodCalledOutOfOrder);
        };

        if let Err(e) = ukey2.parse_handshake_message(payload) {
            self.state = ChannelState::Failed;
            return Err(ChannelError::ParseMessageFailed(e.to_string()));
        }

        let mut actions = Vec::new();
        while ukey2.handshake_state() == HandshakeState::InProgress {
            match ukey2.next_handshake_message() {
                Some(message) => actions.push(ChannelAction::SendHandshakeMessage(message)),
                None => break,
            }
        }

        match ukey2.handshake_state() {
            HandshakeState::VerificationNeeded => {
                let Some(data) = ukey2.verification_data(PAIRING_CODE_LENGTH) else {
                    self.state = ChannelState::Failed;
                    return Err(ChannelError::HandshakeFailed(
                        "no verification data available".to_string(),
                    ));
                };

                if self.resumption.is_some() {
                    actions.push(self.auto_accept_for_resumption(&mut ukey2)?);
                } else {
                    let Some(token) = VerificationToken::new(data) else {
                        self.state = ChannelState::Failed;
                        return Err(ChannelError::HandshakeFailed(
                            "verification data too short for a pairing code".to_string(),
                        ));
                    };
                    self.state = ChannelState::VerificationNeeded;
                    actions.push(ChannelAction::RequiresVerification(token));
                }
            }
            HandshakeState::Error => {
                self.state = ChannelState::Failed;
                return Err(ChannelError::HandshakeFailed(
                    "primitive entered error state".to_string(),
                ));
            }
            _ => {}
        }

        self.ukey2 = Some(ukey2);
        Ok(actions)
    }

    /// Resumption skips the pairing prompt: verify immediately, then prove
    /// continuity with the previous session key.
    fn auto_accept_for_resumption(&mut self, ukey2: &mut Box<dyn Ukey2>) -> Result<ChannelAction> {
        if !ukey2.verify_handshake() || ukey2.handshake_state() != HandshakeState::Finished {
            self.state = ChannelState::Failed;
            return Err(ChannelError::CannotResumeSession(
                "handshake verification failed".to_string(),
            ));
        }
        let Some(new_key) = ukey2.unique_session_key() else {
            self.state = ChannelState::Failed;
            return Err(ChannelError::CannotResumeSession(
                "no session key after handshake".to_string(),
            ));
        };
        let Some(context) = self.resumption.as_mut() else {
            self.state = ChannelState::Failed;
            return Err(ChannelError::MethodCalledOutOfOrder);
        };

        let hmacs = derive_resumption_hmacs(&context.previous_key, &new_key);
        context.expected_server_hmac = Some(hmacs.server);
        self.state = ChannelState::ResumingSession;
        debug!("sent resumption proof, awaiting head unit's");
        Ok(ChannelAction::SendHandshakeMessage(hmacs.client.to_vec()))
    }

    fn check_resumption_proof(&mut self, payload: &[u8]) -> Result<Vec<ChannelAction>> {
        let expected = self
            .resumption
            .as_ref()
            .and_then(|context| context.expected_server_hmac);
        let Some(expected) = expected else {
            return Err(ChannelError::MethodCalledOutOfOrder);
        };

        if payload != expected.as_slice() {
            warn!("head unit resumption proof mismatch");
            self.state = ChannelState::Failed;
            return Err(ChannelError::CannotResumeSession(
                "head unit resumption proof mismatch".to_string(),
            ));
        }

        let Some(ukey2) = self.ukey2.take() else {
            self.state = ChannelState::Failed;
            return Err(ChannelError::MethodCalledOutOfOrder);
        };
        self.cipher = Some(SessionCipher::from_ukey2(ukey2));
        self.state = ChannelState::Established;
        info!("secure channel resumed");
        Ok(vec![ChannelAction::Established])
    }
}

impl Default for Ukey2Channel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carlink_crypto::fake::{FakeUkey2, FakeUkey2Provider};

    fn send_actions(actions: &[ChannelAction]) -> Vec<Vec<u8>> {
        actions
            .iter()
            .filter_map(|action| match action {
                ChannelAction::SendHandshakeMessage(bytes) => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }

    /// Drive a fresh establishment against a raw fake head unit.
    fn establish_fresh() -> (Ukey2Channel, FakeUkey2) {
        let provider = FakeUkey2Provider;
        let mut channel = Ukey2Channel::new();
        let mut head_unit = FakeUkey2::new(Ukey2Role::Responder);

        let actions = channel.establish(&provider).unwrap();
        let outbound = send_actions(&actions);
        assert_eq!(outbound.len(), 1);
        head_unit.parse_handshake_message(&outbound[0]).unwrap();
        let reply = head_unit.next_handshake_message().unwrap();

        let actions = channel.handle_message(&reply).unwrap();
        assert_eq!(channel.state(), ChannelState::VerificationNeeded);
        let ChannelAction::RequiresVerification(token) = &actions[0] else {
            panic!("expected verification request");
        };

        // The head unit derives the same code for its own display.
        let head_unit_data = head_unit.verification_data(6).unwrap();
        assert_eq!(head_unit_data, token.data);
        assert!(head_unit.verify_handshake());

        let actions = channel.notify_pairing_code_accepted().unwrap();
        assert!(matches!(actions[0], ChannelAction::Established));
        assert_eq!(channel.state(), ChannelState::Established);

        (channel, head_unit)
    }

    #[test]
    fn fresh_establishment_yields_interoperating_cipher() {
        let (channel, head_unit) = establish_fresh();

        let ciphertext = channel.encrypt(b"hello head unit").unwrap();
        assert_eq!(head_unit.decode(&ciphertext).unwrap(), b"hello head unit");

        let inbound = head_unit.encode(b"hello phone").unwrap();
        assert_eq!(channel.decrypt(&inbound).unwrap(), b"hello phone");
    }

    #[test]
    fn establish_twice_is_out_of_order() {
        let provider = FakeUkey2Provider;
        let mut channel = Ukey2Channel::new();
        channel.establish(&provider).unwrap();
        assert_eq!(
            channel.establish(&provider).unwrap_err(),
            ChannelError::MethodCalledOutOfOrder
        );
    }

    #[test]
    fn accept_before_verification_is_out_of_order() {
        let mut channel = Ukey2Channel::new();
        assert_eq!(
            channel.notify_pairing_code_accepted().unwrap_err(),
            ChannelError::MethodCalledOutOfOrder
        );

        let provider = FakeUkey2Provider;
        channel.establish(&provider).unwrap();
        assert_eq!(
            channel.notify_pairing_code_accepted().unwrap_err(),
            ChannelError::MethodCalledOutOfOrder
        );
    }

    #[test]
    fn encrypt_before_establishment_is_out_of_order() {
        let channel = Ukey2Channel::new();
        assert_eq!(
            channel.encrypt(b"x").unwrap_err(),
            ChannelError::MethodCalledOutOfOrder
        );
        assert_eq!(
            channel.decrypt(b"x").unwrap_err(),
            ChannelError::MethodCalledOutOfOrder
        );
        assert_eq!(
            channel.save_session().unwrap_err(),
            ChannelError::MethodCalledOutOfOrder
        );
    }

    #[test]
    fn malformed_handshake_message_fails_the_channel() {
        let provider = FakeUkey2Provider;
        let mut channel = Ukey2Channel::new();
        channel.establish(&provider).unwrap();

        let err = channel.handle_message(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, ChannelError::ParseMessageFailed(_)));
        assert_eq!(channel.state(), ChannelState::Failed);
    }

    #[test]
    fn saved_session_survives_pack_and_unpack() {
        let (channel, _head_unit) = establish_fresh();
        let saved = channel.save_session().unwrap();
        let bytes = saved.to_bytes().unwrap();
        assert_eq!(SavedSession::from_bytes(&bytes).unwrap(), saved);
    }

    /// Run a resumption up to the point where the phone has sent its proof.
    fn resume_until_proof(saved: &SavedSession) -> (Ukey2Channel, FakeUkey2, Vec<u8>) {
        let provider = FakeUkey2Provider;
        let mut channel = Ukey2Channel::new();
        let mut head_unit = FakeUkey2::new(Ukey2Role::Responder);

        let actions = channel
            .establish_with_saved_session(&provider, saved)
            .unwrap();
        let outbound = send_actions(&actions);
        head_unit.parse_handshake_message(&outbound[0]).unwrap();
        let reply = head_unit.next_handshake_message().unwrap();

        let actions = channel.handle_message(&reply).unwrap();
        assert_eq!(channel.state(), ChannelState::ResumingSession);
        let proofs = send_actions(&actions);
        assert_eq!(proofs.len(), 1);

        // Head unit finishes its own side of the handshake.
        head_unit.verification_data(6).unwrap();
        assert!(head_unit.verify_handshake());

        (channel, head_unit, proofs[0].clone())
    }

    #[test]
    fn resumption_completes_on_matching_server_proof() {
        let (original, _peer) = establish_fresh();
        let saved = original.save_session().unwrap();

        let (mut channel, head_unit, client_proof) = resume_until_proof(&saved);

        let new_key = head_unit.unique_session_key().unwrap();
        let hmacs = derive_resumption_hmacs(&saved.unique_session_key, &new_key);
        assert_eq!(client_proof, hmacs.client.to_vec());

        let actions = channel.handle_message(&hmacs.server).unwrap();
        assert!(matches!(actions[0], ChannelAction::Established));
        assert_eq!(channel.state(), ChannelState::Established);

        // The resumed session encrypts against the fresh handshake's key.
        let ciphertext = channel.encrypt(b"back again").unwrap();
        assert_eq!(head_unit.decode(&ciphertext).unwrap(), b"back again");
    }

    #[test]
    fn resumption_rejects_wrong_server_proof() {
        let (original, _peer) = establish_fresh();
        let saved = original.save_session().unwrap();

        let (mut channel, _head_unit, _client_proof) = resume_until_proof(&saved);

        let err = channel.handle_message(&[0u8; 32]).unwrap_err();
        assert!(matches!(err, ChannelError::CannotResumeSession(_)));
        assert_eq!(channel.state(), ChannelState::Failed);
        assert!(channel.encryptor().is_none());
    }

    #[test]
    fn empty_saved_session_is_invalid() {
        let provider = FakeUkey2Provider;
        let mut channel = Ukey2Channel::new();
        let err = channel
            .establish_with_saved_session(&provider, &SavedSession::new(vec![], vec![]))
            .unwrap_err();
        assert_eq!(err, ChannelError::InvalidSavedSession);
    }

    #[test]
    fn message_in_established_state_is_out_of_order() {
        let (mut channel, _head_unit) = establish_fresh();
        assert_eq!(
            channel.handle_message(&[0u8; 32]).unwrap_err(),
            ChannelError::MethodCalledOutOfOrder
        );
    }
}
