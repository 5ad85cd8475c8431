//! Status messages published by a device on its status topic.
//!
//! Every message is a JSON object whose `msg` field names the variant.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A decoded status-topic message.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "msg")]
pub enum InboundMessage {
    #[serde(rename = "ENVIRONMENTAL-CURRENT-SENSOR-DATA")]
    SensorReading(SensorReading),

    #[serde(rename = "CURRENT-STATE")]
    CurrentState(StateSnapshot),

    #[serde(rename = "STATE-CHANGE")]
    StateChange(StateChange),

    /// Any `msg` value not listed above. Dropped by the dispatcher.
    #[serde(other)]
    Unknown,
}

/// Air-quality telemetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    #[serde(default)]
    pub time: Option<String>,
    pub data: SensorData,
}

/// Sensor values. Firmware reports most values as zero-padded strings, some
/// models as plain numbers.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SensorData {
    /// PM2.5 density.
    #[serde(default)]
    pub p25r: Option<ReadingValue>,
    /// PM10 density.
    #[serde(default)]
    pub p10r: Option<ReadingValue>,
    /// VOC density.
    #[serde(default)]
    pub va10: Option<ReadingValue>,
    /// NO2 density.
    #[serde(default)]
    pub noxl: Option<ReadingValue>,
    /// Particulate characteristic.
    #[serde(default)]
    pub pact: Option<ReadingValue>,
    /// VOC characteristic (older firmware).
    #[serde(default)]
    pub vact: Option<ReadingValue>,
    /// Everything else the firmware reports (temperature, humidity, ...).
    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

/// A single sensor value as reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReadingValue {
    Number(f64),
    Text(String),
}

impl ReadingValue {
    /// Numeric value, if the reading holds one. Sentinels such as "INIT" or
    /// "OFF" yield `None`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// Full state snapshot, sent on connect and on request.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StateSnapshot {
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default, rename = "mode-reason")]
    pub mode_reason: Option<String>,
    #[serde(default, rename = "state-reason")]
    pub state_reason: Option<String>,
    /// Device settings keyed by firmware field name, kept verbatim.
    #[serde(default, rename = "product-state")]
    pub product_state: Map<String, Value>,
}

/// A state transition. `product-state` values are `[old, new]` pairs.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StateChange {
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default, rename = "mode-reason")]
    pub mode_reason: Option<String>,
    #[serde(default, rename = "state-reason")]
    pub state_reason: Option<String>,
    #[serde(default, rename = "product-state")]
    pub product_state: Map<String, Value>,
}

impl StateChange {
    /// Fields whose value actually changed, as `(field, old, new)`.
    pub fn changes(&self) -> impl Iterator<Item = (&str, &Value, &Value)> {
        self.product_state.iter().filter_map(|(field, value)| {
            let pair = value.as_array()?;
            match pair.as_slice() {
                [old, new] if old != new => Some((field.as_str(), old, new)),
                _ => None,
            }
        })
    }
}
