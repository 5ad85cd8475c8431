//! Pub/sub link abstraction.
//!
//! A transport opens a link to a broker and hands back three things: the
//! link itself for subscribe/close, a [`Handshake`] resolving to the outcome
//! of the connection attempt, and the stream of inbound [`Delivery`]s.

use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;
use dyson_local_credentials::Credentials;
use tokio::sync::{mpsc, oneshot};

use crate::error::ProtocolError;

/// Where the broker lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub scheme: String,
    pub host: IpAddr,
    pub port: u16,
}

impl BrokerAddress {
    pub fn new(scheme: impl Into<String>, host: IpAddr, port: u16) -> Self {
        Self {
            scheme: scheme.into(),
            host,
            port,
        }
    }
}

impl std::fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}", self.scheme, SocketAddr::new(self.host, self.port))
    }
}

/// A message received on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// The two terminal outcomes of a connection attempt.
///
/// The transport fires exactly one of the senders behind these receivers.
pub struct Handshake {
    connected: oneshot::Receiver<()>,
    failed: oneshot::Receiver<ProtocolError>,
}

impl Handshake {
    /// Create a handshake and the senders the transport completes it with.
    pub fn new() -> (Self, HandshakeSignals) {
        let (connected_tx, connected) = oneshot::channel();
        let (failed_tx, failed) = oneshot::channel();
        (
            Self { connected, failed },
            HandshakeSignals {
                connected: Some(connected_tx),
                failed: Some(failed_tx),
            },
        )
    }

    /// Wait for whichever outcome fires first. The losing receiver is
    /// dropped on return, so a late signal on it goes nowhere.
    pub async fn outcome(self) -> Result<(), ProtocolError> {
        let Self { connected, failed } = self;
        tokio::select! {
            biased;
            Ok(()) = connected => Ok(()),
            Ok(err) = failed => Err(err),
            else => Err(ProtocolError::Closed),
        }
    }
}

/// Transport side of a [`Handshake`].
pub struct HandshakeSignals {
    connected: Option<oneshot::Sender<()>>,
    failed: Option<oneshot::Sender<ProtocolError>>,
}

impl HandshakeSignals {
    /// Whether an outcome has already been signalled.
    pub fn is_settled(&self) -> bool {
        self.connected.is_none()
    }

    /// Signal success. No-op once settled.
    pub fn connected(&mut self) {
        self.failed = None;
        if let Some(tx) = self.connected.take() {
            let _ = tx.send(());
        }
    }

    /// Signal failure. Returns the error back if the handshake had already
    /// settled, so the caller can report it another way.
    pub fn failed(&mut self, err: ProtocolError) -> Option<ProtocolError> {
        self.connected = None;
        match self.failed.take() {
            Some(tx) => tx.send(err).err(),
            None => Some(err),
        }
    }
}

/// An open connection to a broker.
#[async_trait]
pub trait PubSubLink: Send + Sync {
    /// Subscribe to `topic`. Resolves once the broker acknowledges.
    async fn subscribe(&self, topic: &str) -> Result<(), ProtocolError>;

    /// Unsubscribe from `topic`.
    async fn unsubscribe(&self, topic: &str) -> Result<(), ProtocolError>;

    /// Disconnect and release the link's resources.
    async fn close(&self) -> Result<(), ProtocolError>;
}

/// Everything a transport hands back when opening a link.
pub struct OpenedLink {
    pub link: Box<dyn PubSubLink>,
    pub handshake: Handshake,
    pub deliveries: mpsc::Receiver<Delivery>,
}

/// Opens links to brokers.
pub trait PubSubTransport: Send + Sync + 'static {
    /// Start connecting to `broker`. The attempt runs in the background;
    /// its outcome arrives through [`OpenedLink::handshake`].
    fn open(
        &self,
        broker: &BrokerAddress,
        credentials: &Credentials,
    ) -> Result<OpenedLink, ProtocolError>;
}
