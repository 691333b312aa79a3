//! Reconnection to an already associated car.
//!
//! The head unit's advertisement carries a truncated SHA-256 over its car id
//! — salted with the advertisement's trailing bytes on newer security
//! versions — which is matched against the credential store before anything
//! connects. Once versions are resolved, the stored session is resumed
//! instead of running a fresh pairing.

use std::sync::Arc;

use carlink_channel::{ChannelAction, SavedSession, SecureBleChannel};
use carlink_core::{Car, MessageParams, StreamVersion};
use carlink_crypto::Ukey2Provider;
use carlink_keychain::CredentialStore;
use carlink_proto::OperationType;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::association::{map_establishment_action, HelperAction};
use crate::error::ReconnectionError;

/// Bytes of the hash prefix carried in the advertisement.
pub const ADVERTISEMENT_HASH_SIZE: usize = 8;

/// Whether `advertisement` names `car_id`.
///
/// Layout: the first 8 bytes are the hash prefix, anything after them salts
/// the hash (empty on security v1/v2 head units).
fn advertisement_matches(car_id: &carlink_core::CarId, advertisement: &[u8]) -> bool {
    if advertisement.len() < ADVERTISEMENT_HASH_SIZE {
        return false;
    }
    let (prefix, salt) = advertisement.split_at(ADVERTISEMENT_HASH_SIZE);

    let mut hasher = Sha256::new();
    hasher.update(car_id.as_str().as_bytes());
    hasher.update(salt);
    let hash = hasher.finalize();
    hash[..ADVERTISEMENT_HASH_SIZE] == *prefix
}

/// Find the associated car a head unit's advertisement belongs to.
pub fn match_advertisement(
    store: &dyn CredentialStore,
    advertisement: &[u8],
) -> Result<Car, ReconnectionError> {
    for car_id in store
        .list_ids()
        .map_err(|_| ReconnectionError::UnassociatedCar)?
    {
        if advertisement_matches(&car_id, advertisement) {
            let record = store
                .get_record(&car_id)
                .map_err(|_| ReconnectionError::UnassociatedCar)?;
            debug!(%car_id, "advertisement matched");
            return Ok(record.car());
        }
    }
    warn!(len = advertisement.len(), "advertisement matched no associated car");
    Err(ReconnectionError::UnassociatedCar)
}

/// The head-unit side of [`advertisement_matches`], for peers and tests.
pub fn advertisement_for(car_id: &carlink_core::CarId, salt: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(car_id.as_str().as_bytes());
    hasher.update(salt);
    let hash = hasher.finalize();

    let mut advertisement = hash[..ADVERTISEMENT_HASH_SIZE].to_vec();
    advertisement.extend_from_slice(salt);
    advertisement
}

#[derive(Debug)]
enum Phase {
    Idle,
    Resuming,
    Completed,
}

/// State machine that reestablishes an encrypted session from saved data.
pub struct ReconnectionHelper {
    channel: SecureBleChannel,
    provider: Arc<dyn Ukey2Provider>,
    store: Arc<dyn CredentialStore>,
    car: Car,
    saved: SavedSession,
    phase: Phase,
}

impl std::fmt::Debug for ReconnectionHelper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectionHelper")
            .field("car", &self.car)
            .field("phase", &self.phase)
            .finish()
    }
}

impl ReconnectionHelper {
    /// Prepare a reconnection for `car`, loading its saved session.
    ///
    /// Fails with [`ReconnectionError::UnassociatedCar`] when no session is
    /// stored — the car must associate from scratch.
    pub fn new(
        car: Car,
        stream_version: StreamVersion,
        provider: Arc<dyn Ukey2Provider>,
        store: Arc<dyn CredentialStore>,
    ) -> Result<Self, ReconnectionError> {
        let session_bytes = store
            .get_session(&car.id)
            .map_err(|_| ReconnectionError::UnassociatedCar)?;
        let saved = SavedSession::from_bytes(&session_bytes)?;

        Ok(Self {
            channel: SecureBleChannel::for_stream_version(stream_version),
            provider,
            store,
            car,
            saved,
            phase: Phase::Idle,
        })
    }

    pub fn car(&self) -> &Car {
        &self.car
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.phase, Phase::Completed)
    }

    /// Open the resuming handshake.
    pub fn start(&mut self) -> Result<Vec<HelperAction>, ReconnectionError> {
        if !matches!(self.phase, Phase::Idle) {
            return Err(ReconnectionError::InvalidMessage);
        }
        self.phase = Phase::Resuming;
        let actions = self
            .channel
            .establish_with_saved_session(self.provider.as_ref(), &self.saved)?;
        self.process_channel_actions(actions)
    }

    /// Feed one reassembled stream message.
    pub fn handle_stream_message(
        &mut self,
        payload: &[u8],
        params: MessageParams,
    ) -> Result<Vec<HelperAction>, ReconnectionError> {
        if !matches!(self.phase, Phase::Resuming)
            || params.operation != OperationType::EncryptionHandshake
        {
            return Err(ReconnectionError::InvalidMessage);
        }
        let actions = self.channel.handle_message(payload)?;
        self.process_channel_actions(actions)
    }

    fn process_channel_actions(
        &mut self,
        actions: Vec<ChannelAction>,
    ) -> Result<Vec<HelperAction>, ReconnectionError> {
        let mut out = Vec::new();
        for action in actions {
            match action {
                ChannelAction::Established => {
                    if let Some(cipher) = self.channel.encryptor() {
                        out.push(HelperAction::InstallEncryptor(cipher));
                    }

                    // Each reconnection rotates the stored session to the
                    // freshly agreed one.
                    if let Ok(rotated) = self.channel.save_session() {
                        if let Ok(bytes) = rotated.to_bytes() {
                            let _ = self.store.put_session(&self.car.id, &bytes);
                        }
                    }

                    self.phase = Phase::Completed;
                    info!(car_id = %self.car.id, "session resumed");
                    out.push(HelperAction::Completed {
                        car: self.car.clone(),
                    });
                }
                other => out.extend(map_establishment_action(other)),
            }
        }
        Ok(out)
    }
}
