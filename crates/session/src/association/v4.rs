//! The v4 association flow.
//!
//! Unlike v2, the pairing verification is an explicit message exchange: the
//! phone either proves possession of an out-of-band token by returning the
//! verification bytes encrypted with it, or shows a visual code and waits
//! for the head unit's confirmation, before accepting the handshake.

use std::sync::Arc;

use carlink_channel::{ChannelAction, SecureBleChannel};
use carlink_core::MessageParams;
use carlink_crypto::{OobToken, Ukey2Provider, VerificationToken};
use carlink_proto::{Message, VerificationCode, VerificationCodeState};
use tracing::{debug, warn};

use crate::association::{map_establishment_action, CredentialExchange, HelperAction};
use crate::error::AssociationError;

enum Phase {
    Idle,
    EstablishingEncryption,
    AwaitingVerificationConfirmation {
        token: VerificationToken,
        used_oob: bool,
    },
    AwaitingCarId,
    Completed,
}

/// Association helper for security v4.
pub struct V4Helper {
    channel: SecureBleChannel,
    provider: Arc<dyn Ukey2Provider>,
    exchange: CredentialExchange,
    oob_token: Option<OobToken>,
    phase: Phase,
}

impl V4Helper {
    pub(crate) fn new(
        channel: SecureBleChannel,
        provider: Arc<dyn Ukey2Provider>,
        exchange: CredentialExchange,
        oob_token: Option<OobToken>,
    ) -> Self {
        Self {
            channel,
            provider,
            exchange,
            oob_token,
            phase: Phase::Idle,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.phase, Phase::Completed)
    }

    pub fn start(&mut self) -> Result<Vec<HelperAction>, AssociationError> {
        if !matches!(self.phase, Phase::Idle) {
            return Err(AssociationError::Unknown(
                "association already started".to_string(),
            ));
        }
        self.phase = Phase::EstablishingEncryption;
        let actions = self.channel.establish(self.provider.as_ref())?;
        self.process_channel_actions(actions)
    }

    pub fn handle_stream_message(
        &mut self,
        payload: &[u8],
        params: MessageParams,
    ) -> Result<Vec<HelperAction>, AssociationError> {
        use carlink_proto::OperationType;

        match (&self.phase, params.operation) {
            (Phase::EstablishingEncryption, OperationType::EncryptionHandshake) => {
                let actions = self.channel.handle_message(payload)?;
                self.process_channel_actions(actions)
            }
            (
                Phase::AwaitingVerificationConfirmation { .. },
                OperationType::EncryptionHandshake,
            ) => self.handle_verification_response(payload),
            (Phase::AwaitingCarId, operation)
                if operation != OperationType::EncryptionHandshake =>
            {
                let (_car, actions) = self.exchange.handle_car_id(payload, &self.channel)?;
                self.phase = Phase::Completed;
                Ok(actions)
            }
            (_, operation) => Err(AssociationError::Unknown(format!(
                "unexpected {operation:?} message"
            ))),
        }
    }

    fn handle_verification_response(
        &mut self,
        payload: &[u8],
    ) -> Result<Vec<HelperAction>, AssociationError> {
        let Phase::AwaitingVerificationConfirmation { token, used_oob } =
            std::mem::replace(&mut self.phase, Phase::EstablishingEncryption)
        else {
            return Err(AssociationError::Unknown(
                "not awaiting verification".to_string(),
            ));
        };

        let code = VerificationCode::decode(payload).map_err(|e| {
            AssociationError::Unknown(format!("undecodable verification message: {e}"))
        })?;

        let confirmed = if used_oob {
            // The head unit proves the same token by echoing our
            // verification bytes under its own nonce.
            code.state() == VerificationCodeState::OobVerification
                && self
                    .oob_token
                    .as_ref()
                    .and_then(|oob| oob.decrypt(&code.payload))
                    .is_some_and(|data| data == token.data)
        } else {
            code.state() == VerificationCodeState::VisualConfirmation
        };

        if !confirmed {
            warn!(state = ?code.state(), used_oob, "pairing verification mismatch");
            return Err(AssociationError::PairingCodeRejected);
        }

        let actions = self.channel.notify_pairing_code_accepted()?;
        self.process_channel_actions(actions)
    }

    fn process_channel_actions(
        &mut self,
        actions: Vec<ChannelAction>,
    ) -> Result<Vec<HelperAction>, AssociationError> {
        let mut out = Vec::new();
        for action in actions {
            match action {
                ChannelAction::RequiresVerification(token) => {
                    out.extend(self.send_verification(token)?);
                }
                ChannelAction::Established => {
                    if let Some(cipher) = self.channel.encryptor() {
                        out.push(HelperAction::InstallEncryptor(cipher));
                    }
                    self.phase = Phase::AwaitingCarId;
                }
                other => out.extend(map_establishment_action(other)),
            }
        }
        Ok(out)
    }

    fn send_verification(
        &mut self,
        token: VerificationToken,
    ) -> Result<Vec<HelperAction>, AssociationError> {
        let mut out = Vec::new();

        let (state, payload, used_oob) = match &self.oob_token {
            Some(oob) => {
                let ciphertext = oob.encrypt(&token.data).ok_or_else(|| {
                    AssociationError::Unknown("out-of-band encryption failed".to_string())
                })?;
                debug!("sending out-of-band verification");
                (VerificationCodeState::OobVerification, ciphertext, true)
            }
            None => {
                debug!("displaying visual pairing code");
                out.push(HelperAction::DisplayPairingCode(token.pairing_code.clone()));
                (VerificationCodeState::VisualVerification, Vec::new(), false)
            }
        };

        let message = VerificationCode {
            state: state as i32,
            payload,
        };
        out.push(HelperAction::SendMessage {
            payload: message.encode_to_vec(),
            params: MessageParams::handshake(),
        });

        self.phase = Phase::AwaitingVerificationConfirmation { token, used_oob };
        Ok(out)
    }
}
