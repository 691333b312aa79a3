//! Messaging and security version negotiation.
//!
//! Runs once per connection, over the raw characteristics and before any
//! framing exists: the phone writes its supported ranges as a plain
//! [`VersionExchange`], the head unit answers with its own, and the
//! intersection picks the highest mutually supported pair. Head units on
//! security v3 or later follow up with one capabilities message whose
//! content this layer ignores.

use carlink_core::{SecurityVersion, StreamVersion};
use carlink_proto::{Message, VersionExchange};
use thiserror::Error;
use tracing::{debug, info};

/// Result type for version resolution
pub type Result<T> = std::result::Result<T, VersionError>;

/// Version resolution failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("No mutually supported protocol version")]
    VersionNotSupported,

    #[error("Failed to read the peer's version exchange: {0}")]
    FailedToRead(String),

    #[error("Peer sent an empty version response")]
    EmptyResponse,
}

/// Oldest messaging revision the phone still speaks.
pub const MIN_MESSAGING_VERSION: i32 = 2;
/// Newest messaging revision the phone speaks (v3 adds compression).
pub const MAX_MESSAGING_VERSION: i32 = 3;
/// Oldest security revision the phone still speaks.
pub const MIN_SECURITY_VERSION: i32 = 1;
/// Newest security revision the phone speaks.
pub const MAX_SECURITY_VERSION: i32 = 4;

/// Outcome of a completed negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedVersions {
    pub stream_version: StreamVersion,
    pub security_version: SecurityVersion,
}

/// What the caller must do next after feeding a response in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionStep {
    /// Versions agreed; keep reading one more raw message (the capabilities
    /// blob) before handing the peripheral to the stream.
    AwaitingCapabilities(ResolvedVersions),

    /// Negotiation finished.
    Resolved(ResolvedVersions),
}

#[derive(Debug)]
enum Phase {
    AwaitingVersions,
    AwaitingCapabilities(ResolvedVersions),
    Done,
}

/// Event-driven negotiator; one per connection attempt.
#[derive(Debug)]
pub struct VersionResolver {
    phase: Phase,
}

impl VersionResolver {
    pub fn new() -> Self {
        Self {
            phase: Phase::AwaitingVersions,
        }
    }

    /// The request the phone writes to open negotiation.
    pub fn request_bytes() -> Vec<u8> {
        VersionExchange {
            min_supported_messaging_version: MIN_MESSAGING_VERSION,
            max_supported_messaging_version: MAX_MESSAGING_VERSION,
            min_supported_security_version: MIN_SECURITY_VERSION,
            max_supported_security_version: MAX_SECURITY_VERSION,
        }
        .encode_to_vec()
    }

    /// Feed the next raw characteristic value from the head unit.
    pub fn handle_response(&mut self, bytes: &[u8]) -> Result<ResolutionStep> {
        match self.phase {
            Phase::AwaitingVersions => {
                let resolved = resolve(bytes)?;
                if resolved.security_version.requires_capabilities_exchange() {
                    self.phase = Phase::AwaitingCapabilities(resolved);
                    Ok(ResolutionStep::AwaitingCapabilities(resolved))
                } else {
                    self.phase = Phase::Done;
                    Ok(ResolutionStep::Resolved(resolved))
                }
            }
            Phase::AwaitingCapabilities(resolved) => {
                // Content is accepted unexamined at this layer.
                debug!(len = bytes.len(), "received capabilities blob");
                self.phase = Phase::Done;
                Ok(ResolutionStep::Resolved(resolved))
            }
            Phase::Done => Err(VersionError::FailedToRead(
                "version exchange already completed".to_string(),
            )),
        }
    }
}

impl Default for VersionResolver {
    fn default() -> Self {
        Self::new()
    }
}

fn resolve(bytes: &[u8]) -> Result<ResolvedVersions> {
    if bytes.is_empty() {
        return Err(VersionError::EmptyResponse);
    }
    let peer =
        VersionExchange::decode(bytes).map_err(|e| VersionError::FailedToRead(e.to_string()))?;

    let messaging_lo = MIN_MESSAGING_VERSION.max(peer.min_supported_messaging_version);
    let messaging_hi = MAX_MESSAGING_VERSION.min(peer.max_supported_messaging_version);
    let stream_version = if messaging_lo > messaging_hi {
        // Head units predating messaging v2 never advertise a range that
        // reaches ours; they get the unframed legacy stream.
        if peer.max_supported_messaging_version == 1 {
            StreamVersion::Passthrough
        } else {
            return Err(VersionError::VersionNotSupported);
        }
    } else if messaging_hi >= 3 {
        StreamVersion::V2 { compression: true }
    } else {
        StreamVersion::V2 { compression: false }
    };

    let security_lo = MIN_SECURITY_VERSION.max(peer.min_supported_security_version);
    let security_hi = MAX_SECURITY_VERSION.min(peer.max_supported_security_version);
    if security_lo > security_hi {
        return Err(VersionError::VersionNotSupported);
    }
    let security_version =
        SecurityVersion::from_wire(security_hi).ok_or(VersionError::VersionNotSupported)?;

    info!(?stream_version, %security_version, "resolved protocol versions");
    Ok(ResolvedVersions {
        stream_version,
        security_version,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(msg: (i32, i32), sec: (i32, i32)) -> Vec<u8> {
        VersionExchange {
            min_supported_messaging_version: msg.0,
            max_supported_messaging_version: msg.1,
            min_supported_security_version: sec.0,
            max_supported_security_version: sec.1,
        }
        .encode_to_vec()
    }

    #[test]
    fn request_advertises_full_ranges() {
        let request = VersionExchange::decode(VersionResolver::request_bytes().as_slice()).unwrap();
        assert_eq!(request.min_supported_messaging_version, 2);
        assert_eq!(request.max_supported_messaging_version, 3);
        assert_eq!(request.min_supported_security_version, 1);
        assert_eq!(request.max_supported_security_version, 4);
    }

    #[test]
    fn common_v2_without_compression() {
        let mut resolver = VersionResolver::new();
        let step = resolver.handle_response(&peer((2, 2), (2, 2))).unwrap();
        assert_eq!(
            step,
            ResolutionStep::Resolved(ResolvedVersions {
                stream_version: StreamVersion::V2 { compression: false },
                security_version: SecurityVersion::V2,
            })
        );
    }

    #[test]
    fn messaging_v3_enables_compression() {
        let mut resolver = VersionResolver::new();
        let step = resolver.handle_response(&peer((2, 3), (1, 2))).unwrap();
        assert_eq!(
            step,
            ResolutionStep::Resolved(ResolvedVersions {
                stream_version: StreamVersion::V2 { compression: true },
                security_version: SecurityVersion::V2,
            })
        );
    }

    #[test]
    fn security_v3_waits_for_capabilities() {
        let mut resolver = VersionResolver::new();
        let resolved = ResolvedVersions {
            stream_version: StreamVersion::V2 { compression: true },
            security_version: SecurityVersion::V4,
        };

        let step = resolver.handle_response(&peer((2, 3), (1, 4))).unwrap();
        assert_eq!(step, ResolutionStep::AwaitingCapabilities(resolved));

        let step = resolver.handle_response(&[0xCA, 0xFE]).unwrap();
        assert_eq!(step, ResolutionStep::Resolved(resolved));
    }

    #[test]
    fn legacy_messaging_v1_peer_gets_passthrough() {
        let mut resolver = VersionResolver::new();
        let step = resolver.handle_response(&peer((1, 1), (1, 1))).unwrap();
        assert_eq!(
            step,
            ResolutionStep::Resolved(ResolvedVersions {
                stream_version: StreamVersion::Passthrough,
                security_version: SecurityVersion::V1,
            })
        );
    }

    #[test]
    fn disjoint_ranges_are_not_supported() {
        let mut resolver = VersionResolver::new();
        let err = resolver.handle_response(&peer((20, 20), (10, 10))).unwrap_err();
        assert_eq!(err, VersionError::VersionNotSupported);
    }

    #[test]
    fn disjoint_security_is_not_supported() {
        let mut resolver = VersionResolver::new();
        let err = resolver.handle_response(&peer((2, 3), (10, 10))).unwrap_err();
        assert_eq!(err, VersionError::VersionNotSupported);
    }

    #[test]
    fn empty_response_is_distinguished() {
        let mut resolver = VersionResolver::new();
        assert_eq!(
            resolver.handle_response(&[]).unwrap_err(),
            VersionError::EmptyResponse
        );
    }

    #[test]
    fn trailing_garbage_fails_to_read() {
        let mut resolver = VersionResolver::new();
        let err = resolver.handle_response(&[0xFF; 7]).unwrap_err();
        assert!(matches!(err, VersionError::FailedToRead(_)));
    }

    #[test]
    fn resolver_is_single_use() {
        let mut resolver = VersionResolver::new();
        resolver.handle_response(&peer((2, 2), (1, 1))).unwrap();
        assert!(resolver.handle_response(&peer((2, 2), (1, 1))).is_err());
    }
}
