//! In-memory broker for testing.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dyson_local_credentials::Credentials;
use tokio::sync::mpsc;

use crate::connection::{
    BrokerAddress, Delivery, Handshake, HandshakeSignals, OpenedLink, PubSubLink, PubSubTransport,
};
use crate::error::ProtocolError;

/// How the mock broker answers a connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectBehavior {
    /// CONNACK straight away.
    Accept,
    /// CONNACK after the given delay.
    AcceptAfter(Duration),
    /// Fail the handshake with a connection error.
    Refuse(String),
    /// Never answer.
    Hang,
}

/// A connection attempt as seen by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Login {
    pub broker: String,
    pub username: String,
    pub password: String,
}

struct Shared {
    behavior: Mutex<ConnectBehavior>,
    reject_subscriptions: AtomicBool,
    opened: AtomicUsize,
    closed: AtomicUsize,
    logins: Mutex<Vec<Login>>,
    subscriptions: Mutex<Vec<String>>,
    unsubscriptions: Mutex<Vec<String>>,
    live: Mutex<Option<mpsc::Sender<Delivery>>>,
}

/// Mock broker and transport in one. Clones share state.
#[derive(Clone)]
pub struct MockBroker {
    shared: Arc<Shared>,
}

impl Default for MockBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBroker {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                behavior: Mutex::new(ConnectBehavior::Accept),
                reject_subscriptions: AtomicBool::new(false),
                opened: AtomicUsize::new(0),
                closed: AtomicUsize::new(0),
                logins: Mutex::new(Vec::new()),
                subscriptions: Mutex::new(Vec::new()),
                unsubscriptions: Mutex::new(Vec::new()),
                live: Mutex::new(None),
            }),
        }
    }

    /// Change how subsequent connection attempts are answered.
    pub fn set_behavior(&self, behavior: ConnectBehavior) {
        *self.shared.behavior.lock().unwrap() = behavior;
    }

    /// Answer subsequent subscriptions with a failure return code.
    pub fn reject_subscriptions(&self) {
        self.shared.reject_subscriptions.store(true, Ordering::SeqCst);
    }

    /// Publish to the most recently opened, still open link.
    ///
    /// Returns `false` if no link is open.
    pub async fn publish(&self, topic: &str, payload: &[u8]) -> bool {
        let tx = self.shared.live.lock().unwrap().clone();
        let Some(tx) = tx else {
            return false;
        };
        tx.send(Delivery {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        })
        .await
        .is_ok()
    }

    /// Links opened and not yet closed.
    pub fn open_links(&self) -> usize {
        self.shared.opened.load(Ordering::SeqCst) - self.shared.closed.load(Ordering::SeqCst)
    }

    /// Total connection attempts.
    pub fn connect_attempts(&self) -> usize {
        self.shared.opened.load(Ordering::SeqCst)
    }

    pub fn logins(&self) -> Vec<Login> {
        self.shared.logins.lock().unwrap().clone()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.shared.subscriptions.lock().unwrap().clone()
    }

    pub fn unsubscriptions(&self) -> Vec<String> {
        self.shared.unsubscriptions.lock().unwrap().clone()
    }
}

impl PubSubTransport for MockBroker {
    fn open(
        &self,
        broker: &BrokerAddress,
        credentials: &Credentials,
    ) -> Result<OpenedLink, ProtocolError> {
        self.shared.opened.fetch_add(1, Ordering::SeqCst);
        self.shared.logins.lock().unwrap().push(Login {
            broker: broker.to_string(),
            username: credentials.username().to_string(),
            password: credentials.password().to_string(),
        });

        let (handshake, mut signals) = Handshake::new();
        let (delivery_tx, deliveries) = mpsc::channel(64);
        *self.shared.live.lock().unwrap() = Some(delivery_tx);

        let behavior = self.shared.behavior.lock().unwrap().clone();
        let mut held = None;
        match behavior {
            ConnectBehavior::Accept => signals.connected(),
            ConnectBehavior::AcceptAfter(delay) => {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    signals.connected();
                });
            }
            ConnectBehavior::Refuse(reason) => {
                signals.failed(ProtocolError::Connection(reason));
            }
            ConnectBehavior::Hang => held = Some(signals),
        }

        Ok(OpenedLink {
            link: Box::new(MockLink {
                shared: self.shared.clone(),
                closed: AtomicBool::new(false),
                _held: Mutex::new(held),
            }),
            handshake,
            deliveries,
        })
    }
}

struct MockLink {
    shared: Arc<Shared>,
    closed: AtomicBool,
    _held: Mutex<Option<HandshakeSignals>>,
}

#[async_trait]
impl PubSubLink for MockLink {
    async fn subscribe(&self, topic: &str) -> Result<(), ProtocolError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ProtocolError::Closed);
        }
        if self.shared.reject_subscriptions.load(Ordering::SeqCst) {
            return Err(ProtocolError::SubscribeRejected(topic.to_string()));
        }
        self.shared.subscriptions.lock().unwrap().push(topic.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), ProtocolError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ProtocolError::Closed);
        }
        self.shared.unsubscriptions.lock().unwrap().push(topic.to_string());
        Ok(())
    }

    async fn close(&self) -> Result<(), ProtocolError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.shared.closed.fetch_add(1, Ordering::SeqCst);
            *self.shared.live.lock().unwrap() = None;
        }
        Ok(())
    }
}

impl Drop for MockLink {
    /// A link dropped without `close()` still counts as closed, the way a
    /// real socket goes away with its owner.
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.shared.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}
