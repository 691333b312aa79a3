//! The authenticated, encrypted channel handed to feature managers.
//!
//! A `SecuredChannel` is a cheap handle: actual writes, query correlation
//! and message routing happen on the connection's event loop, reached
//! through the command channel. Dropping the handle does not tear the
//! connection down.

use std::collections::HashSet;

use carlink_core::{Car, MessageParams};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Result type for secured channel operations
pub type Result<T> = std::result::Result<T, SecuredChannelError>;

/// Errors surfaced to feature managers
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SecuredChannelError {
    #[error("Connection is closed")]
    ConnectionClosed,

    #[error("Head unit reported the query as failed")]
    QueryFailed,
}

/// Callback invoked with each inbound message for an observed recipient.
///
/// For `Query` traffic the payload is the encoded `Query` envelope; for
/// everything else it is the feature's own bytes.
pub type MessageHandler = Box<dyn FnMut(Vec<u8>, MessageParams) + Send>;

/// Requests feature managers place on the connection's event loop
pub enum ChannelCommand {
    /// Encrypt and send over the stream.
    Send {
        payload: Vec<u8>,
        params: MessageParams,
    },

    /// Send a correlated query; the loop routes the response back.
    Query {
        recipient: Uuid,
        request: Vec<u8>,
        respond_to: oneshot::Sender<Result<Vec<u8>>>,
    },

    /// Register a handler for messages addressed to `recipient`.
    Observe {
        recipient: Uuid,
        handler: MessageHandler,
    },
}

/// Encrypted, authenticated messaging with one associated car.
pub struct SecuredChannel {
    car: Car,
    commands: mpsc::UnboundedSender<ChannelCommand>,
    /// Feature uuids the head unit reported support for at association,
    /// when a snapshot is on record.
    known_features: Option<HashSet<Uuid>>,
}

impl SecuredChannel {
    pub(crate) fn new(
        car: Car,
        commands: mpsc::UnboundedSender<ChannelCommand>,
        feature_status: Option<Vec<u8>>,
    ) -> Self {
        Self {
            car,
            commands,
            known_features: feature_status.as_deref().map(parse_feature_status),
        }
    }

    /// The car this channel talks to.
    pub fn car(&self) -> &Car {
        &self.car
    }

    /// Encrypt and send `payload`.
    pub fn send(&self, payload: Vec<u8>, params: MessageParams) -> Result<()> {
        self.commands
            .send(ChannelCommand::Send { payload, params })
            .map_err(|_| SecuredChannelError::ConnectionClosed)
    }

    /// Send a query and await the head unit's response.
    pub async fn send_query(&self, recipient: Uuid, request: Vec<u8>) -> Result<Vec<u8>> {
        let (respond_to, response) = oneshot::channel();
        self.commands
            .send(ChannelCommand::Query {
                recipient,
                request,
                respond_to,
            })
            .map_err(|_| SecuredChannelError::ConnectionClosed)?;
        response
            .await
            .map_err(|_| SecuredChannelError::ConnectionClosed)?
    }

    /// Deliver inbound messages addressed to `recipient` to `handler`.
    pub fn observe_messages(&self, recipient: Uuid, handler: MessageHandler) -> Result<()> {
        self.commands
            .send(ChannelCommand::Observe { recipient, handler })
            .map_err(|_| SecuredChannelError::ConnectionClosed)
    }

    /// Whether the head unit supports `feature`.
    ///
    /// Answered from the feature snapshot recorded at association when one
    /// exists; otherwise resolved with an empty query to the feature itself.
    pub async fn is_feature_supported(&self, feature: Uuid) -> bool {
        if let Some(known) = &self.known_features {
            return known.contains(&feature);
        }
        self.send_query(feature, Vec::new()).await.is_ok()
    }
}

/// The feature snapshot is the concatenation of supported feature uuids.
fn parse_feature_status(bytes: &[u8]) -> HashSet<Uuid> {
    bytes
        .chunks_exact(16)
        .filter_map(|chunk| Uuid::from_slice(chunk).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use carlink_core::CarId;

    fn channel_with(
        feature_status: Option<Vec<u8>>,
    ) -> (SecuredChannel, mpsc::UnboundedReceiver<ChannelCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let car = Car::new(CarId::new("test-car"), None);
        (SecuredChannel::new(car, tx, feature_status), rx)
    }

    #[test]
    fn send_enqueues_a_command() {
        let (channel, mut rx) = channel_with(None);
        let params = MessageParams::new(
            Uuid::new_v4(),
            carlink_proto::OperationType::ClientMessage,
        );
        channel.send(vec![1, 2, 3], params).unwrap();

        let Some(ChannelCommand::Send { payload, params: p }) = rx.try_recv().ok() else {
            panic!("expected send command");
        };
        assert_eq!(payload, vec![1, 2, 3]);
        assert_eq!(p, params);
    }

    #[test]
    fn send_after_loop_shutdown_reports_closed() {
        let (channel, rx) = channel_with(None);
        drop(rx);
        let params = MessageParams::new(
            Uuid::new_v4(),
            carlink_proto::OperationType::ClientMessage,
        );
        assert_eq!(
            channel.send(vec![], params).unwrap_err(),
            SecuredChannelError::ConnectionClosed
        );
    }

    #[tokio::test]
    async fn feature_snapshot_answers_without_a_query() {
        let supported = Uuid::new_v4();
        let other = Uuid::new_v4();
        let (channel, mut rx) = channel_with(Some(supported.as_bytes().to_vec()));

        assert!(channel.is_feature_supported(supported).await);
        assert!(!channel.is_feature_supported(other).await);
        // No commands were issued.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn missing_snapshot_falls_back_to_a_query() {
        let feature = Uuid::new_v4();
        let (channel, mut rx) = channel_with(None);

        let probe = tokio::spawn(async move { channel.is_feature_supported(feature).await });

        let Some(ChannelCommand::Query {
            recipient,
            request,
            respond_to,
        }) = rx.recv().await
        else {
            panic!("expected query command");
        };
        assert_eq!(recipient, feature);
        assert!(request.is_empty());
        respond_to.send(Ok(vec![1])).unwrap();

        assert!(probe.await.unwrap());
    }

    #[test]
    fn feature_snapshot_parsing_skips_ragged_tails() {
        let a = Uuid::new_v4();
        let mut bytes = a.as_bytes().to_vec();
        bytes.extend_from_slice(&[1, 2, 3]);

        let parsed = parse_feature_status(&bytes);
        assert_eq!(parsed.len(), 1);
        assert!(parsed.contains(&a));
    }
}
