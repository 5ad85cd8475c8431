//! MQTT transport layer and wire format for dyson-local.
//!
//! This crate handles the broker connection (via rumqttc), the race between
//! a successful CONNACK and a connection error, subscription acknowledgement,
//! and decoding of status-topic payloads.

pub mod connection;
pub mod error;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod transport;
pub mod wire;

pub use connection::{
    BrokerAddress, Delivery, Handshake, HandshakeSignals, OpenedLink, PubSubLink, PubSubTransport,
};
pub use error::{DecodeErrorKind, MessageDecodeError, ProtocolError};
pub use transport::MqttTransport;
pub use wire::decode_status;
