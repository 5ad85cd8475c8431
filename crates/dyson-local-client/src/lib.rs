//! Device connection for dyson-local.
//!
//! Implements the connection lifecycle state machine (discover, connect,
//! subscribe, dispatch, tear down), the exponential backoff used to retry
//! it, observer callbacks for decoded status messages, and configuration
//! loading for the CLI.

pub mod config;
pub mod connection;
pub mod error;
pub mod observer;
pub mod retry;
pub mod setup;
pub mod state;

pub use config::Config;
pub use connection::DeviceConnection;
pub use error::ClientError;
pub use observer::{ChannelObserver, DeviceEvent, DeviceObserver};
pub use retry::{backoff, exponential, exponential_backoff, Exponential, ExponentialOptions};
pub use state::ConnectionState;
