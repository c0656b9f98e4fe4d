//! Network-layer error types.

use std::time::Duration;

use crate::messages::MessageKind;

/// A message that cannot be accepted. Never retried.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The bytes are not a well-formed envelope.
    #[error("malformed envelope: {0}")]
    Malformed(#[source] serde_json::Error),

    /// The envelope names a kind this build does not know.
    #[error("unknown message kind {0:?}")]
    UnknownKind(String),

    /// The payload does not match its kind or fails validation.
    #[error("invalid {kind} payload: {reason}")]
    InvalidPayload {
        /// Kind the payload was checked against.
        kind: MessageKind,
        /// Why it was rejected.
        reason: String,
    },
}

/// Errors that can occur during network operations.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// Failed to encode a message to JSON.
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    /// Failed to decode a message from JSON.
    #[error("failed to decode message: {0}")]
    Decode(#[source] serde_json::Error),

    /// The message was decoded but rejected by the protocol.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// NATS connection error.
    #[error("NATS connection error: {0}")]
    Connect(#[from] async_nats::ConnectError),

    /// NATS request error.
    #[error("NATS request error: {0}")]
    Request(#[from] async_nats::RequestError),

    /// NATS subscription error.
    #[error("NATS subscribe error: {0}")]
    Subscribe(#[from] async_nats::SubscribeError),

    /// NATS publish error.
    #[error("NATS publish error: {0}")]
    Publish(#[from] async_nats::PublishError),

    /// Any other NATS or JetStream error.
    #[error("NATS error: {0}")]
    Nats(String),

    /// An outbound call did not complete in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Every delivery attempt to a queue failed.
    #[error("delivery to {queue} failed after {attempts} attempts")]
    DeliveryFailed {
        /// Target queue.
        queue: String,
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// The queue is closed and will not deliver anything else.
    #[error("queue {0} is closed")]
    Closed(String),
}
