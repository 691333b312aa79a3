//! The v2 association flow.
//!
//! Establish encryption, accept the pairing code as soon as it is displayed
//! (the user confirms on the head unit's screen), then run the id/key
//! exchange. Security v1 head units run this same flow over the passthrough
//! channel, and v3 runs it after its capabilities exchange.

use std::sync::Arc;

use carlink_channel::{ChannelAction, SecureBleChannel};
use carlink_core::MessageParams;
use carlink_crypto::Ukey2Provider;
use carlink_proto::OperationType;
use tracing::debug;

use crate::association::{map_establishment_action, CredentialExchange, HelperAction};
use crate::error::AssociationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    EstablishingEncryption,
    AwaitingCarId,
    Completed,
}

/// Minimal association helper for security v1 through v3.
pub struct V2Helper {
    channel: SecureBleChannel,
    provider: Arc<dyn Ukey2Provider>,
    exchange: CredentialExchange,
    phase: Phase,
}

impl V2Helper {
    pub(crate) fn new(
        channel: SecureBleChannel,
        provider: Arc<dyn Ukey2Provider>,
        exchange: CredentialExchange,
    ) -> Self {
        Self {
            channel,
            provider,
            exchange,
            phase: Phase::Idle,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.phase == Phase::Completed
    }

    pub fn start(&mut self) -> Result<Vec<HelperAction>, AssociationError> {
        if self.phase != Phase::Idle {
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
        match (self.phase, params.operation) {
            (Phase::EstablishingEncryption, OperationType::EncryptionHandshake) => {
                let actions = self.channel.handle_message(payload)?;
                self.process_channel_actions(actions)
            }
            (Phase::AwaitingCarId, operation)
                if operation != OperationType::EncryptionHandshake =>
            {
                let (_car, actions) = self.exchange.handle_car_id(payload, &self.channel)?;
                self.phase = Phase::Completed;
                Ok(actions)
            }
            (phase, operation) => Err(AssociationError::Unknown(format!(
                "unexpected {operation:?} message in phase {phase:?}"
            ))),
        }
    }

    fn process_channel_actions(
        &mut self,
        actions: Vec<ChannelAction>,
    ) -> Result<Vec<HelperAction>, AssociationError> {
        let mut out = Vec::new();
        for action in actions {
            match action {
                ChannelAction::RequiresVerification(token) => {
                    debug!("pairing code displayed, accepting");
                    out.push(HelperAction::DisplayPairingCode(token.pairing_code));
                    let more = self.channel.notify_pairing_code_accepted()?;
                    out.extend(self.process_channel_actions(more)?);
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
}
