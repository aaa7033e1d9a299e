//! Error types shared across the broker and its transports.
//!
//! Every failure the engine can report is a closed enum variant; the
//! transports switch on the variant to pick a wire code or HTTP status,
//! never on a string.

use thiserror::Error;

/// Failures returned by [`crate::broker::Broker`] operations.
///
/// All of these are recoverable by the caller; none should take the
/// process down.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BrokerError {
    /// An operation referenced a topic that does not exist.
    #[error("topic `{0}` not found")]
    TopicNotFound(String),

    /// `create_topic` was called with a name that is already registered.
    #[error("topic `{0}` already exists")]
    TopicExists(String),

    /// Malformed input at construction time: empty topic name, zero
    /// replay capacity, zero queue capacity. Indicates a programming or
    /// configuration error, so callers are expected to fail fast.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl BrokerError {
    /// Stable wire-level code for this error, shared by the WebSocket
    /// error frames and the HTTP JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            BrokerError::TopicNotFound(_) => "TOPIC_NOT_FOUND",
            BrokerError::TopicExists(_) => "CONFLICT",
            BrokerError::InvalidArgument(_) => "BAD_REQUEST",
        }
    }
}

/// Failures reported by a [`crate::transport::Transport`] when sending.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer is gone; nothing further can be delivered.
    #[error("transport closed")]
    Closed,

    /// A single frame could not be handed to the transport.
    #[error("send failed: {0}")]
    Send(String),
}
