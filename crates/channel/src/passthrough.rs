//! The legacy passthrough channel.
//!
//! Head units predating the v2 stream do no key agreement at all. The
//! channel still walks the same establishment shape — a verification phase
//! with a fixed `"000000"` code, then an "established" state whose cipher is
//! the identity — so the association flows above never special-case it.

use carlink_crypto::VerificationToken;
use tracing::info;

use crate::cipher::SessionCipher;
use crate::error::{ChannelError, Result};
use crate::ukey2_channel::{ChannelAction, ChannelState};

/// Pairing code every passthrough establishment presents.
pub const PASSTHROUGH_PAIRING_CODE: &str = "000000";

/// No-crypto secure channel for legacy association flows.
pub struct PassthroughChannel {
    state: ChannelState,
}

impl PassthroughChannel {
    pub fn new() -> Self {
        Self {
            state: ChannelState::Uninitialized,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Enter the verification phase immediately; there is no handshake.
    pub fn establish(&mut self) -> Result<Vec<ChannelAction>> {
        if self.state != ChannelState::Uninitialized {
            return Err(ChannelError::MethodCalledOutOfOrder);
        }
        self.state = ChannelState::VerificationNeeded;
        let token = VerificationToken {
            data: vec![0u8; 6],
            pairing_code: PASSTHROUGH_PAIRING_CODE.to_string(),
        };
        Ok(vec![ChannelAction::RequiresVerification(token)])
    }

    pub fn notify_pairing_code_accepted(&mut self) -> Result<Vec<ChannelAction>> {
        if self.state != ChannelState::VerificationNeeded {
            return Err(ChannelError::MethodCalledOutOfOrder);
        }
        self.state = ChannelState::Established;
        info!("passthrough channel established");
        Ok(vec![ChannelAction::Established])
    }

    pub fn encrypt(&self, message: &[u8]) -> Result<Vec<u8>> {
        if self.state != ChannelState::Established {
            return Err(ChannelError::MethodCalledOutOfOrder);
        }
        Ok(message.to_vec())
    }

    pub fn decrypt(&self, message: &[u8]) -> Result<Vec<u8>> {
        if self.state != ChannelState::Established {
            return Err(ChannelError::MethodCalledOutOfOrder);
        }
        Ok(message.to_vec())
    }

    pub fn encryptor(&self) -> Option<SessionCipher> {
        if self.state != ChannelState::Established {
            return None;
        }
        Some(SessionCipher::Identity)
    }
}

impl Default for PassthroughChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn establishment_presents_the_fixed_code() {
        let mut channel = PassthroughChannel::new();
        let actions = channel.establish().unwrap();
        assert_eq!(channel.state(), ChannelState::VerificationNeeded);

        let ChannelAction::RequiresVerification(token) = &actions[0] else {
            panic!("expected verification request");
        };
        assert_eq!(token.pairing_code, PASSTHROUGH_PAIRING_CODE);
    }

    #[test]
    fn accept_establishes_identity_cipher() {
        let mut channel = PassthroughChannel::new();
        channel.establish().unwrap();
        let actions = channel.notify_pairing_code_accepted().unwrap();
        assert!(matches!(actions[0], ChannelAction::Established));

        assert_eq!(channel.encrypt(b"plain").unwrap(), b"plain");
        assert_eq!(channel.decrypt(b"plain").unwrap(), b"plain");
        assert!(channel.encryptor().is_some());
    }

    #[test]
    fn out_of_order_calls_are_rejected() {
        let mut channel = PassthroughChannel::new();
        assert_eq!(
            channel.notify_pairing_code_accepted().unwrap_err(),
            ChannelError::MethodCalledOutOfOrder
        );
        assert_eq!(
            channel.encrypt(b"x").unwrap_err(),
            ChannelError::MethodCalledOutOfOrder
        );
        assert!(channel.encryptor().is_none());

        channel.establish().unwrap();
        assert_eq!(
            channel.establish().unwrap_err(),
            ChannelError::MethodCalledOutOfOrder
        );
    }
}
