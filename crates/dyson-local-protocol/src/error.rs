//! Protocol and transport errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("broker refused connection: {0}")]
    Refused(String),

    #[error("broker rejected subscription to {0}")]
    SubscribeRejected(String),

    #[error("connection closed")]
    Closed,

    #[error(transparent)]
    Client(#[from] rumqttc::ClientError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A status-topic payload that is not a valid message.
#[derive(Debug, Error)]
#[error("invalid status message ({kind}): {payload}")]
pub struct MessageDecodeError {
    #[source]
    pub kind: DecodeErrorKind,
    /// The raw payload, lossily converted to text.
    pub payload: String,
}

#[derive(Debug, Error)]
pub enum DecodeErrorKind {
    #[error("payload of {0} bytes exceeds maximum")]
    TooLarge(usize),

    #[error("payload is not UTF-8")]
    Utf8,

    #[error("payload is not a status document: {0}")]
    Json(#[from] serde_json::Error),
}
