//! Client errors.

use std::time::Duration;

use thiserror::Error;

use crate::state::ConnectionState;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("cannot go from {from} to {to}")]
    InvalidTransition {
        from: ConnectionState,
        to: ConnectionState,
    },

    #[error("credentials error: {0}")]
    Credentials(#[from] dyson_local_credentials::DecryptError),

    #[error("discovery error: {0}")]
    Discovery(#[from] dyson_local_discovery::DiscoveryError),

    #[error("connection to {broker} failed: {source}")]
    Connection {
        broker: String,
        #[source]
        source: dyson_local_protocol::ProtocolError,
    },

    #[error("no answer from {broker} within {timeout:?}")]
    HandshakeTimeout { broker: String, timeout: Duration },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
