//! Errors raised by the multiplexed subscription WebSocket client.

/// Failure establishing or maintaining an upstream subscription connection.
#[derive(Debug, thiserror::Error)]
pub enum SubscriptionError {
    /// The upstream did not switch protocols / accept the `graphql-ws`
    /// subprotocol.
    #[error("upstream handshake failed: {0}")]
    Handshake(String),

    /// `connection_ack` did not arrive within the handshake timeout.
    #[error("timed out waiting for connection_ack")]
    AckTimeout,

    /// The upstream sent a `connection_error` frame.
    #[error("connection error")]
    ConnectionError,

    /// The underlying WebSocket transport failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// A frame could not be decoded as a `graphql-ws` protocol message.
    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] serde_json::Error),

    /// Delivery to a subscriber's channel exceeded the bounded-send timeout.
    #[error("subscriber delivery timed out")]
    DeliveryTimeout,
}
