//! The tagged sum the rest of the stack drives.
//!
//! Selected once at version-resolution time: passthrough streams get the
//! legacy no-crypto channel, everything else drives UKey2.

use carlink_core::StreamVersion;
use carlink_crypto::Ukey2Provider;

use crate::cipher::SessionCipher;
use crate::error::{ChannelError, Result};
use crate::passthrough::PassthroughChannel;
use crate::saved::SavedSession;
use crate::ukey2_channel::{ChannelAction, ChannelState, Ukey2Channel};

/// A secure BLE channel, either legacy passthrough or UKey2-backed.
pub enum SecureBleChannel {
    Passthrough(PassthroughChannel),
    Ukey2(Ukey2Channel),
}

impl SecureBleChannel {
    /// Pick the channel variant the resolved stream version calls for.
    pub fn for_stream_version(version: StreamVersion) -> Self {
        match version {
            StreamVersion::Passthrough => Self::Passthrough(PassthroughChannel::new()),
            StreamVersion::V2 { .. } => Self::Ukey2(Ukey2Channel::new()),
        }
    }

    pub fn state(&self) -> ChannelState {
        match self {
            Self::Passthrough(channel) => channel.state(),
            Self::Ukey2(channel) => channel.state(),
        }
    }

    /// Begin establishment; for UKey2 this opens the handshake.
    pub fn establish(&mut self, provider: &dyn Ukey2Provider) -> Result<Vec<ChannelAction>> {
        match self {
            Self::Passthrough(channel) => channel.establish(),
            Self::Ukey2(channel) => channel.establish(provider),
        }
    }

    /// Begin establishment that resumes a previously saved session.
    pub fn establish_with_saved_session(
        &mut self,
        provider: &dyn Ukey2Provider,
        saved: &SavedSession,
    ) -> Result<Vec<ChannelAction>> {
        match self {
            // There is no session state to resume without key agreement.
            Self::Passthrough(_) => Err(ChannelError::InvalidSavedSession),
            Self::Ukey2(channel) => channel.establish_with_saved_session(provider, saved),
        }
    }

    /// Feed one inbound message addressed to the secure channel.
    pub fn handle_message(&mut self, payload: &[u8]) -> Result<Vec<ChannelAction>> {
        match self {
            Self::Passthrough(_) => Err(ChannelError::MethodCalledOutOfOrder),
            Self::Ukey2(channel) => channel.handle_message(payload),
        }
    }

    pub fn notify_pairing_code_accepted(&mut self) -> Result<Vec<ChannelAction>> {
        match self {
            Self::Passthrough(channel) => channel.notify_pairing_code_accepted(),
            Self::Ukey2(channel) => channel.notify_pairing_code_accepted(),
        }
    }

    pub fn encrypt(&self, message: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::Passthrough(channel) => channel.encrypt(message),
            Self::Ukey2(channel) => channel.encrypt(message),
        }
    }

    pub fn decrypt(&self, message: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::Passthrough(channel) => channel.decrypt(message),
            Self::Ukey2(channel) => channel.decrypt(message),
        }
    }

    /// Capture the session for later resumption (UKey2 only).
    pub fn save_session(&self) -> Result<SavedSession> {
        match self {
            Self::Passthrough(_) => Err(ChannelError::InvalidSavedSession),
            Self::Ukey2(channel) => channel.save_session(),
        }
    }

    /// The encryptor to install on the stream once established.
    pub fn encryptor(&self) -> Option<SessionCipher> {
        match self {
            Self::Passthrough(channel) => channel.encryptor(),
            Self::Ukey2(channel) => channel.encryptor(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carlink_crypto::fake::FakeUkey2Provider;

    #[test]
    fn passthrough_is_selected_for_the_legacy_stream() {
        let channel = SecureBleChannel::for_stream_version(StreamVersion::Passthrough);
        assert!(matches!(channel, SecureBleChannel::Passthrough(_)));
    }

    #[test]
    fn ukey2_is_selected_for_v2_streams() {
        for compression in [false, true] {
            let channel =
                SecureBleChannel::for_stream_version(StreamVersion::V2 { compression });
            assert!(matches!(channel, SecureBleChannel::Ukey2(_)));
        }
    }

    #[test]
    fn passthrough_cannot_resume() {
        let mut channel = SecureBleChannel::for_stream_version(StreamVersion::Passthrough);
        let err = channel
            .establish_with_saved_session(
                &FakeUkey2Provider,
                &SavedSession::new(vec![1], vec![2]),
            )
            .unwrap_err();
        assert_eq!(err, ChannelError::InvalidSavedSession);
    }

    #[test]
    fn passthrough_full_flow_through_the_sum() {
        let mut channel = SecureBleChannel::for_stream_version(StreamVersion::Passthrough);
        let actions = channel.establish(&FakeUkey2Provider).unwrap();
        assert!(matches!(actions[0], ChannelAction::RequiresVerification(_)));

        channel.notify_pairing_code_accepted().unwrap();
        assert_eq!(channel.state(), ChannelState::Established);
        assert_eq!(channel.encrypt(b"data").unwrap(), b"data");
        assert!(channel.save_session().is_err());
    }
}
