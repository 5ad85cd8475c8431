//! Device connection lifecycle.
//!
//! `start()` resolves `<serial>.local`, connects to the device's broker with
//! the credentials derived at construction, subscribes to the status topic
//! and begins dispatching status messages to the observer. `stop()` undoes
//! all of it. Transitions are serialised: the state is checked and moved
//! atomically, and the live session sits behind a lock `start()` holds until
//! it settles, so a `stop()` issued while starting waits and then tears down.

use std::sync::Arc;

use dyson_local_credentials::Credentials;
use dyson_local_discovery::NetworkDiscovery;
use dyson_local_protocol::{
    decode_status, BrokerAddress, Delivery, OpenedLink, ProtocolError, PubSubLink,
    PubSubTransport,
};
use dyson_local_types::{DeviceDescriptor, InboundMessage, TopicSet};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::ConnectionConfig;
use crate::error::ClientError;
use crate::observer::DeviceObserver;
use crate::state::{ConnectionState, StateCell};

/// Connection to a single device.
pub struct DeviceConnection {
    descriptor: DeviceDescriptor,
    credentials: Credentials,
    topics: TopicSet,
    config: ConnectionConfig,
    discovery: NetworkDiscovery,
    transport: Arc<dyn PubSubTransport>,
    observer: Arc<dyn DeviceObserver>,
    state: Arc<StateCell>,
    session: Mutex<Option<Session>>,
}

/// Resources of a started connection.
struct Session {
    broker: BrokerAddress,
    link: Box<dyn PubSubLink>,
    dispatcher: JoinHandle<()>,
}

impl Drop for Session {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

impl DeviceConnection {
    /// Create a connection for `descriptor`.
    ///
    /// Decrypts the device password here, once. A descriptor whose blob
    /// does not decrypt yields no connection at all.
    pub fn new(
        descriptor: DeviceDescriptor,
        config: ConnectionConfig,
        discovery: NetworkDiscovery,
        transport: impl PubSubTransport,
        observer: Arc<dyn DeviceObserver>,
    ) -> Result<Self, ClientError> {
        let credentials = Credentials::from_descriptor(&descriptor)?;
        let topics = TopicSet::new(&descriptor.product_type, &descriptor.serial);

        Ok(Self {
            descriptor,
            credentials,
            topics,
            config,
            discovery,
            transport: Arc::new(transport),
            observer,
            state: Arc::new(StateCell::default()),
            session: Mutex::new(None),
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    pub fn topics(&self) -> &TopicSet {
        &self.topics
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    /// Discover the device, connect and subscribe.
    ///
    /// Fails immediately with [`ClientError::InvalidTransition`] unless the
    /// connection is stopped. On any other failure the connection is back
    /// to stopped with nothing left open.
    pub async fn start(&self) -> Result<(), ClientError> {
        let current = self.state.get();
        if current != ConnectionState::Stopped {
            return Err(ClientError::InvalidTransition {
                from: current,
                to: ConnectionState::Starting,
            });
        }
        // Starting is only ever visible while the session lock is held, so a
        // concurrent stop() always waits for this start to settle.
        let mut session = self.session.lock().await;
        self.state
            .transition(ConnectionState::Stopped, ConnectionState::Starting)?;
        let mut abandoned = AbandonedStart {
            state: &self.state,
            armed: true,
        };
        info!(serial = %self.descriptor.serial, "starting device connection");

        let outcome = self.establish().await;
        abandoned.armed = false;
        match outcome {
            Ok((established, gate)) => {
                self.state
                    .transition(ConnectionState::Starting, ConnectionState::Started)?;
                info!(
                    broker = %established.broker,
                    topic = %self.topics.status,
                    "device connection started"
                );
                *session = Some(established);
                // Opens the dispatcher; deliveries received so far are queued.
                let _ = gate.send(());
                Ok(())
            }
            Err(e) => {
                self.state
                    .transition(ConnectionState::Starting, ConnectionState::Stopped)?;
                warn!(serial = %self.descriptor.serial, error = %e, "device connection failed to start");
                Err(e)
            }
        }
    }

    /// Unsubscribe, disconnect and stop dispatching.
    ///
    /// Returns at once if the connection is not started. A call made while
    /// `start()` is in flight waits for it to settle first.
    pub async fn stop(&self) -> Result<(), ClientError> {
        let mut session = self.session.lock().await;
        let Some(active) = session.take() else {
            debug!(serial = %self.descriptor.serial, "stop requested while not started");
            return Ok(());
        };
        self.state
            .transition(ConnectionState::Started, ConnectionState::Stopping)?;
        info!(broker = %active.broker, "stopping device connection");

        active.dispatcher.abort();
        if let Err(e) = active.link.unsubscribe(&self.topics.status).await {
            warn!(error = %e, "unsubscribe failed");
        }
        if let Err(e) = active.link.close().await {
            warn!(error = %e, "close failed");
        }
        drop(active);

        self.state
            .transition(ConnectionState::Stopping, ConnectionState::Stopped)?;
        info!(serial = %self.descriptor.serial, "device connection stopped");
        Ok(())
    }

    async fn establish(&self) -> Result<(Session, oneshot::Sender<()>), ClientError> {
        let host = self.discovery.resolve(&self.descriptor.hostname()).await?;
        let broker = BrokerAddress::new(self.config.scheme.clone(), host, self.config.port);

        let OpenedLink {
            link,
            handshake,
            deliveries,
        } = self
            .transport
            .open(&broker, &self.credentials)
            .map_err(|source| connection_error(&broker, source))?;

        let timeout = self.config.handshake_timeout();
        let connected = match tokio::time::timeout(timeout, handshake.outcome()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(connection_error(&broker, source)),
            Err(_) => Err(ClientError::HandshakeTimeout {
                broker: broker.to_string(),
                timeout,
            }),
        };
        if let Err(e) = connected {
            close_quietly(link.as_ref()).await;
            return Err(e);
        }
        debug!(broker = %broker, "connected to broker");

        // The dispatcher takes the delivery stream before the subscription
        // exists, so nothing the broker sends after SUBACK can be missed.
        let (gate_tx, gate_rx) = oneshot::channel();
        let dispatcher = Dispatcher {
            status_topic: self.topics.status.clone(),
            state: self.state.clone(),
            observer: self.observer.clone(),
        };
        let dispatcher = tokio::spawn(dispatcher.run(deliveries, gate_rx));
        let session = Session {
            broker,
            link,
            dispatcher,
        };

        if let Err(source) = session.link.subscribe(&self.topics.status).await {
            close_quietly(session.link.as_ref()).await;
            return Err(connection_error(&session.broker, source));
        }
        Ok((session, gate_tx))
    }
}

/// Puts the state back to stopped when a `start()` future is dropped before
/// it settles. Whatever it had opened is released by the drop itself.
struct AbandonedStart<'a> {
    state: &'a StateCell,
    armed: bool,
}

impl Drop for AbandonedStart<'_> {
    fn drop(&mut self) {
        if self.armed {
            let _ = self
                .state
                .transition(ConnectionState::Starting, ConnectionState::Stopped);
        }
    }
}

fn connection_error(broker: &BrokerAddress, source: ProtocolError) -> ClientError {
    ClientError::Connection {
        broker: broker.to_string(),
        source,
    }
}

async fn close_quietly(link: &dyn PubSubLink) {
    if let Err(e) = link.close().await {
        debug!(error = %e, "close after failed start");
    }
}

/// Routes status-topic deliveries to the observer.
struct Dispatcher {
    status_topic: String,
    state: Arc<StateCell>,
    observer: Arc<dyn DeviceObserver>,
}

impl Dispatcher {
    async fn run(self, mut deliveries: mpsc::Receiver<Delivery>, gate: oneshot::Receiver<()>) {
        if gate.await.is_err() {
            return;
        }
        while let Some(delivery) = deliveries.recv().await {
            self.handle(&delivery);
        }
        debug!("delivery stream ended");
    }

    fn handle(&self, delivery: &Delivery) {
        if delivery.topic != self.status_topic {
            trace!(topic = %delivery.topic, "ignoring delivery on foreign topic");
            return;
        }
        if self.state.get() != ConnectionState::Started {
            trace!("ignoring delivery while not started");
            return;
        }

        match decode_status(&delivery.payload) {
            Ok(InboundMessage::SensorReading(reading)) => self.observer.on_sensor_reading(reading),
            Ok(InboundMessage::CurrentState(state)) => self.observer.on_current_state(state),
            Ok(InboundMessage::StateChange(change)) => self.observer.on_state_change(change),
            Ok(InboundMessage::Unknown) => debug!("ignoring status message of unknown kind"),
            Err(e) => {
                warn!(error = %e, "undecodable status message");
                self.observer.on_error(e);
            }
        }
    }
}
