//! Connection lifecycle state machine.

use std::sync::atomic::{AtomicU8, Ordering};

use crate::error::ClientError;

/// Lifecycle state of a device connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// No broker connection.
    Stopped = 0,
    /// Discovering the device and connecting.
    Starting = 1,
    /// Subscribed; status messages are dispatched.
    Started = 2,
    /// Tearing down the broker connection.
    Stopping = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Starting,
            2 => Self::Started,
            3 => Self::Stopping,
            _ => Self::Stopped,
        }
    }

    /// Whether the lifecycle allows going from `self` to `to`.
    pub fn can_enter(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Stopped, Self::Starting)
                | (Self::Starting, Self::Started | Self::Stopped)
                | (Self::Started, Self::Stopping)
                | (Self::Stopping, Self::Stopped)
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "Stopped"),
            Self::Starting => write!(f, "Starting"),
            Self::Started => write!(f, "Started"),
            Self::Stopping => write!(f, "Stopping"),
        }
    }
}

/// Atomically updated [`ConnectionState`].
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl Default for StateCell {
    fn default() -> Self {
        Self(AtomicU8::new(ConnectionState::Stopped as u8))
    }
}

impl StateCell {
    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move from `from` to `to`, failing if the current state is not `from`
    /// or the lifecycle has no such edge.
    pub fn transition(&self, from: ConnectionState, to: ConnectionState) -> Result<(), ClientError> {
        if !from.can_enter(to) {
            return Err(ClientError::InvalidTransition { from, to });
        }
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|actual| ClientError::InvalidTransition {
                from: ConnectionState::from_u8(actual),
                to,
            })
    }
}
