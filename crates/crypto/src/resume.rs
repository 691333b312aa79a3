//! Key derivation for session resumption.
//!
//! On reconnection both peers prove possession of the previous session by
//! deriving two HMACs from the concatenated old and new session keys. The
//! phone sends the client value and requires the head unit's reply to equal
//! the server value; the differing `info` labels keep the two directions
//! domain-separated.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

/// Salt binding the derivation to the resumption exchange.
const RESUMPTION_SALT: &[u8] = b"RESUME";

/// Info label for the phone-to-head-unit direction.
const CLIENT_INFO: &[u8] = b"CLIENT";

/// Info label for the head-unit-to-phone direction.
const SERVER_INFO: &[u8] = b"SERVER";

/// Size of each derived HMAC in bytes.
pub const RESUMPTION_HMAC_SIZE: usize = 32;

/// The two directional resumption proofs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumptionHmacs {
    /// Sent by the phone.
    pub client: [u8; RESUMPTION_HMAC_SIZE],

    /// Expected from the head unit.
    pub server: [u8; RESUMPTION_HMAC_SIZE],
}

/// Derive both resumption HMACs from the previous and freshly agreed session
/// keys.
pub fn derive_resumption_hmacs(previous_key: &[u8], new_key: &[u8]) -> ResumptionHmacs {
    let mut combined = Zeroizing::new(Vec::with_capacity(previous_key.len() + new_key.len()));
    combined.extend_from_slice(previous_key);
    combined.extend_from_slice(new_key);

    let hkdf = Hkdf::<Sha256>::new(Some(RESUMPTION_SALT), &combined);

    let mut client = [0u8; RESUMPTION_HMAC_SIZE];
    let Ok(()) = hkdf.expand(CLIENT_INFO, &mut client) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };

    let mut server = [0u8; RESUMPTION_HMAC_SIZE];
    let Ok(()) = hkdf.expand(SERVER_INFO, &mut server) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };

    ResumptionHmacs { client, server }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn derivation_is_deterministic() {
        let a = derive_resumption_hmacs(b"previous-session-key", b"new-session-key");
        let b = derive_resumption_hmacs(b"previous-session-key", b"new-session-key");
        assert_eq!(a, b);
    }

    #[test]
    fn directions_are_domain_separated() {
        let hmacs = derive_resumption_hmacs(b"previous", b"new");
        assert_ne!(hmacs.client, hmacs.server);
    }

    #[test]
    fn keys_bind_both_inputs() {
        let baseline = derive_resumption_hmacs(b"prev", b"new");
        assert_ne!(
            baseline,
            derive_resumption_hmacs(b"prev", b"other"),
            "new key must matter"
        );
        assert_ne!(
            baseline,
            derive_resumption_hmacs(b"other", b"new"),
            "previous key must matter"
        );
    }

    #[test]
    fn concatenation_order_matters() {
        let forward = derive_resumption_hmacs(b"aaaa", b"bbbb");
        let reversed = derive_resumption_hmacs(b"bbbb", b"aaaa");
        assert_ne!(forward.client, reversed.client);
    }

    proptest! {
        #[test]
        fn client_never_equals_server(
            previous in proptest::collection::vec(any::<u8>(), 0..64),
            new in proptest::collection::vec(any::<u8>(), 0..64),
        ) {
            let hmacs = derive_resumption_hmacs(&previous, &new);
            prop_assert_ne!(hmacs.client, hmacs.server);
        }
    }
}
