//! Shared types for dyson-local.
//!
//! This crate contains the types shared across the dyson-local workspace:
//! the device descriptor handed over by the account API, the MQTT topic
//! namespace derived from it, and the status messages a device publishes.

pub mod descriptor;
pub mod message;
pub mod topics;

pub use descriptor::{ConnectionType, DeviceDescriptor, ProductType};
pub use message::{
    InboundMessage, ReadingValue, SensorData, SensorReading, StateChange, StateSnapshot,
};
pub use topics::TopicSet;
