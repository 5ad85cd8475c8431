//! MQTT transport over rumqttc.

use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use dyson_local_credentials::Credentials;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
    SubscribeReasonCode,
};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::connection::{
    BrokerAddress, Delivery, Handshake, HandshakeSignals, OpenedLink, PubSubLink, PubSubTransport,
};
use crate::error::ProtocolError;

/// Capacity of the request and delivery channels.
const CHANNEL_CAPACITY: usize = 64;

/// How long `close()` waits for the event loop to flush the DISCONNECT.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Pause between losing an established connection and reconnecting.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// MQTT 3.1.1 transport.
///
/// Once the first CONNACK has arrived the link survives broker restarts and
/// dropped sockets: the event loop reconnects after [`RECONNECT_DELAY`] and
/// every active subscription is sent again on the new session.
#[derive(Debug, Clone)]
pub struct MqttTransport {
    keep_alive: Duration,
}

impl MqttTransport {
    pub fn new(keep_alive: Duration) -> Self {
        Self { keep_alive }
    }
}

impl Default for MqttTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl PubSubTransport for MqttTransport {
    fn open(
        &self,
        broker: &BrokerAddress,
        credentials: &Credentials,
    ) -> Result<OpenedLink, ProtocolError> {
        let client_id = format!("dyson-local-{}", credentials.username());
        let mut options = MqttOptions::new(client_id, broker.host.to_string(), broker.port);
        options.set_credentials(credentials.username(), credentials.password());
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);

        let (client, event_loop) = AsyncClient::new(options, CHANNEL_CAPACITY);
        let (handshake, signals) = Handshake::new();
        let (delivery_tx, deliveries) = mpsc::channel(CHANNEL_CAPACITY);
        let subscriptions = Arc::new(StdMutex::new(Subscriptions::default()));

        let pump = tokio::spawn(drive(
            event_loop,
            client.clone(),
            subscriptions.clone(),
            signals,
            delivery_tx,
        ));
        info!(broker = %broker, username = credentials.username(), "connecting to broker");

        Ok(OpenedLink {
            link: Box::new(MqttLink {
                client,
                subscriptions,
                subscribing: Mutex::new(()),
                pump: Mutex::new(Some(pump)),
            }),
            handshake,
            deliveries,
        })
    }
}

/// Topics to restore after a reconnect, and the subscription waiting for its
/// SUBACK.
#[derive(Default)]
struct Subscriptions {
    topics: Vec<String>,
    waiter: Option<oneshot::Sender<Result<(), ProtocolError>>>,
}

type SharedSubscriptions = Arc<StdMutex<Subscriptions>>;

fn lock(subscriptions: &SharedSubscriptions) -> MutexGuard<'_, Subscriptions> {
    subscriptions.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Poll the event loop until the link is closed, routing packets to the
/// handshake, the delivery channel and the pending subscription.
///
/// An error before the first CONNACK settles the handshake and ends the
/// pump. After it, errors are connection losses: the next poll reconnects.
async fn drive(
    mut event_loop: EventLoop,
    client: AsyncClient,
    subscriptions: SharedSubscriptions,
    mut signals: HandshakeSignals,
    deliveries: mpsc::Sender<Delivery>,
) {
    loop {
        let lost = match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) if ack.code != ConnectReturnCode::Success => {
                ProtocolError::Refused(format!("{:?}", ack.code))
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                if signals.is_settled() {
                    restore_subscriptions(&client, &subscriptions);
                } else {
                    debug!("CONNACK received");
                    signals.connected();
                }
                continue;
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                let result = if ack
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, SubscribeReasonCode::Failure))
                {
                    Err(ProtocolError::SubscribeRejected(format!("pkid {}", ack.pkid)))
                } else {
                    Ok(())
                };
                let waiter = lock(&subscriptions).waiter.take();
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(result);
                    }
                    None => {
                        if let Err(e) = result {
                            warn!(error = %e, "broker rejected a restored subscription");
                        }
                    }
                }
                continue;
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                trace!(topic = %publish.topic, len = publish.payload.len(), "publish received");
                let delivery = Delivery {
                    topic: publish.topic,
                    payload: publish.payload.to_vec(),
                };
                if deliveries.send(delivery).await.is_err() {
                    trace!("no delivery receiver, dropping publish");
                }
                continue;
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                // The socket close that follows surfaces as an error.
                warn!("broker sent DISCONNECT");
                continue;
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("DISCONNECT sent");
                break;
            }
            Ok(event) => {
                trace!(?event, "MQTT event");
                continue;
            }
            Err(e) => ProtocolError::Connection(e.to_string()),
        };

        if !signals.is_settled() {
            signals.failed(lost);
            break;
        }
        warn!(error = %lost, delay = ?RECONNECT_DELAY, "broker connection lost, reconnecting");
        tokio::time::sleep(RECONNECT_DELAY).await;
    }

    // Dropped first so a subscribe racing the shutdown fails to send instead
    // of installing a waiter nobody will answer.
    drop(event_loop);
    if let Some(waiter) = lock(&subscriptions).waiter.take() {
        let _ = waiter.send(Err(ProtocolError::Closed));
    }
}

fn restore_subscriptions(client: &AsyncClient, subscriptions: &SharedSubscriptions) {
    let topics = lock(subscriptions).topics.clone();
    info!(count = topics.len(), "reconnected to broker, restoring subscriptions");
    for topic in topics {
        if let Err(e) = client.try_subscribe(topic.as_str(), QoS::AtMostOnce) {
            warn!(topic = %topic, error = %e, "failed to restore subscription");
        }
    }
}

struct MqttLink {
    client: AsyncClient,
    subscriptions: SharedSubscriptions,
    /// One subscription in flight at a time, so the next SUBACK is ours.
    subscribing: Mutex<()>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl PubSubLink for MqttLink {
    async fn subscribe(&self, topic: &str) -> Result<(), ProtocolError> {
        let _in_flight = self.subscribing.lock().await;
        let (tx, rx) = oneshot::channel();
        {
            let mut subscriptions = lock(&self.subscriptions);
            subscriptions.waiter = Some(tx);
            // Listed before SUBACK so a reconnect in between re-sends it.
            subscriptions.topics.push(topic.to_string());
        }

        let ack = match self.client.subscribe(topic, QoS::AtMostOnce).await {
            Ok(()) => rx.await.unwrap_or(Err(ProtocolError::Closed)),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = ack {
            let mut subscriptions = lock(&self.subscriptions);
            subscriptions.waiter = None;
            subscriptions.topics.retain(|t| t != topic);
            return Err(match e {
                ProtocolError::SubscribeRejected(_) => {
                    ProtocolError::SubscribeRejected(topic.to_string())
                }
                other => other,
            });
        }
        debug!(topic, "subscribed");
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), ProtocolError> {
        lock(&self.subscriptions).topics.retain(|t| t != topic);
        self.client.unsubscribe(topic).await?;
        debug!(topic, "unsubscribed");
        Ok(())
    }

    async fn close(&self) -> Result<(), ProtocolError> {
        let Some(pump) = self.pump.lock().await.take() else {
            return Ok(());
        };
        if let Err(e) = self.client.disconnect().await {
            debug!(error = %e, "event loop already stopped");
        }

        let abort = pump.abort_handle();
        if tokio::time::timeout(CLOSE_GRACE, pump).await.is_err() {
            warn!("event loop did not stop in time, aborting");
            abort.abort();
        }
        info!("broker connection closed");
        Ok(())
    }
}

impl Drop for MqttLink {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.get_mut().take() {
            pump.abort();
        }
    }
}
