//! MQTT topic namespace of a device.

use crate::descriptor::ProductType;

/// The topics a device publishes on and listens to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSet {
    /// `<productType>/<serial>/status/current`
    pub status: String,
    /// `<productType>/<serial>/command`, reserved for actuation.
    pub command: String,
}

impl TopicSet {
    pub fn new(product_type: &ProductType, serial: &str) -> Self {
        let namespace = format!("{}/{serial}", product_type.code());
        Self {
            status: format!("{namespace}/status/current"),
            command: format!("{namespace}/command"),
        }
    }
}
