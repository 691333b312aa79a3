//! First-time pairing state machines.
//!
//! One helper runs per association attempt, version-dispatched on the
//! resolved [`SecurityVersion`]. Helpers own the secure channel and consume
//! stream messages; everything they want done — writes, encryptor
//! installation, showing the pairing code — comes back as
//! [`HelperAction`]s for the connection driver to execute.

mod v2;
mod v4;

use std::sync::Arc;

use carlink_channel::{ChannelAction, SecureBleChannel, SessionCipher};
use carlink_core::{Car, CarId, DeviceId, MessageParams, SecurityVersion};
use carlink_crypto::{OobToken, Ukey2Provider};
use carlink_keychain::CredentialStore;
use carlink_proto::OperationType;
use rand::RngCore;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::AssociationError;

pub use v2::V2Helper;
pub use v4::V4Helper;

/// Size of the generated authentication key in bytes.
pub const AUTHENTICATION_KEY_SIZE: usize = 32;

/// Work the connection driver performs on a helper's behalf
#[derive(Debug)]
pub enum HelperAction {
    /// Write a plaintext message over the stream.
    SendMessage {
        payload: Vec<u8>,
        params: MessageParams,
    },

    /// Encrypt with the stream's encryptor, then write.
    SendEncryptedMessage {
        payload: Vec<u8>,
        params: MessageParams,
    },

    /// The channel established; install this on the stream.
    InstallEncryptor(SessionCipher),

    /// Show the user the pairing code for visual confirmation.
    DisplayPairingCode(String),

    /// The attempt finished; publish a secured channel for `car`.
    Completed { car: Car },
}

/// Version-dispatched association helper.
///
/// Security v1 head units run the V2 exchange over the passthrough channel;
/// v3 runs the V2 exchange as well (its capabilities step already happened
/// during version resolution).
pub enum AssociationHelper {
    V2(V2Helper),
    V3(V2Helper),
    V4(V4Helper),
}

impl AssociationHelper {
    pub fn new(
        security_version: SecurityVersion,
        channel: SecureBleChannel,
        provider: Arc<dyn Ukey2Provider>,
        store: Arc<dyn CredentialStore>,
        device_id: DeviceId,
        oob_token: Option<OobToken>,
    ) -> Self {
        let exchange = CredentialExchange { device_id, store };
        match security_version {
            SecurityVersion::V1 | SecurityVersion::V2 => {
                Self::V2(V2Helper::new(channel, provider, exchange))
            }
            SecurityVersion::V3 => Self::V3(V2Helper::new(channel, provider, exchange)),
            SecurityVersion::V4 => {
                Self::V4(V4Helper::new(channel, provider, exchange, oob_token))
            }
        }
    }

    /// Kick off channel establishment.
    pub fn start(&mut self) -> Result<Vec<HelperAction>, AssociationError> {
        match self {
            Self::V2(helper) | Self::V3(helper) => helper.start(),
            Self::V4(helper) => helper.start(),
        }
    }

    /// Feed one reassembled stream message.
    pub fn handle_stream_message(
        &mut self,
        payload: &[u8],
        params: MessageParams,
    ) -> Result<Vec<HelperAction>, AssociationError> {
        match self {
            Self::V2(helper) | Self::V3(helper) => helper.handle_stream_message(payload, params),
            Self::V4(helper) => helper.handle_stream_message(payload, params),
        }
    }

    /// Whether the attempt has produced its `Completed` action.
    pub fn is_completed(&self) -> bool {
        match self {
            Self::V2(helper) | Self::V3(helper) => helper.is_completed(),
            Self::V4(helper) => helper.is_completed(),
        }
    }
}

/// The id/key exchange every version finishes with.
pub(crate) struct CredentialExchange {
    pub(crate) device_id: DeviceId,
    pub(crate) store: Arc<dyn CredentialStore>,
}

impl CredentialExchange {
    /// Handle the head unit's car-id message: persist credentials and answer
    /// with `device_id || authentication_key`.
    pub(crate) fn handle_car_id(
        &self,
        payload: &[u8],
        channel: &SecureBleChannel,
    ) -> Result<(Car, Vec<HelperAction>), AssociationError> {
        let car_id =
            CarId::from_raw_bytes(payload).ok_or(AssociationError::MalformedCarId)?;
        debug!(%car_id, "received car id");

        let mut key = vec![0u8; AUTHENTICATION_KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut key);

        self.store
            .put_key(&car_id, &key)
            .map_err(|_| AssociationError::AuthenticationKeyStorageFailed)?;

        // The session snapshot rides along when the channel can produce one;
        // a car without it simply pairs from scratch next time.
        if let Ok(saved) = channel.save_session() {
            if let Ok(bytes) = saved.to_bytes() {
                let _ = self.store.put_session(&car_id, &bytes);
            }
        }

        let mut response = self.device_id.as_bytes().to_vec();
        response.extend_from_slice(&key);

        let car = Car::new(car_id, None);
        info!(car_id = %car.id, "association credentials exchanged");
        Ok((
            car.clone(),
            vec![
                HelperAction::SendEncryptedMessage {
                    payload: response,
                    params: MessageParams::new(Uuid::nil(), OperationType::ClientMessage),
                },
                HelperAction::Completed { car },
            ],
        ))
    }
}

/// Translate channel establishment output shared by every helper version.
pub(crate) fn map_establishment_action(action: ChannelAction) -> Option<HelperAction> {
    match action {
        ChannelAction::SendHandshakeMessage(payload) => Some(HelperAction::SendMessage {
            payload,
            params: MessageParams::handshake(),
        }),
        // Verification is version-specific; callers intercept it first.
        ChannelAction::RequiresVerification(_) => None,
        ChannelAction::Established => None,
    }
}
