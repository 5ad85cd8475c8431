//! Discovery subsystem errors.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("no mDNS answer for {hostname} within {timeout:?}")]
    Timeout { hostname: String, timeout: Duration },

    #[error("failed to send mDNS query: {0}")]
    Send(String),

    #[error("mDNS backend failed: {0}")]
    Backend(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
