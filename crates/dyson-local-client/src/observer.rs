//! Observers of decoded status messages.

use dyson_local_protocol::MessageDecodeError;
use dyson_local_types::{SensorReading, StateChange, StateSnapshot};
use tokio::sync::mpsc;

/// Receives the messages a started connection decodes.
///
/// Callbacks run on the connection's dispatch task and should return
/// quickly; hand work off to another task if it can block.
pub trait DeviceObserver: Send + Sync + 'static {
    fn on_sensor_reading(&self, _reading: SensorReading) {}

    fn on_current_state(&self, _state: StateSnapshot) {}

    fn on_state_change(&self, _change: StateChange) {}

    /// A status-topic payload could not be decoded. The connection stays up.
    fn on_error(&self, _error: MessageDecodeError) {}
}

/// Ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl DeviceObserver for NoopObserver {}

/// Everything a [`ChannelObserver`] forwards.
#[derive(Debug)]
pub enum DeviceEvent {
    SensorReading(SensorReading),
    CurrentState(StateSnapshot),
    StateChange(StateChange),
    DecodeError(MessageDecodeError),
}

/// Forwards observer callbacks into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<DeviceEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DeviceEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: DeviceEvent) {
        // The receiver going away just means nobody is listening any more.
        let _ = self.tx.send(event);
    }
}

impl DeviceObserver for ChannelObserver {
    fn on_sensor_reading(&self, reading: SensorReading) {
        self.forward(DeviceEvent::SensorReading(reading));
    }

    fn on_current_state(&self, state: StateSnapshot) {
        self.forward(DeviceEvent::CurrentState(state));
    }

    fn on_state_change(&self, change: StateChange) {
        self.forward(DeviceEvent::StateChange(change));
    }

    fn on_error(&self, error: MessageDecodeError) {
        self.forward(DeviceEvent::DecodeError(error));
    }
}
