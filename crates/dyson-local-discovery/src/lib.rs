//! mDNS hostname resolution for dyson-local.
//!
//! Devices announce themselves as `<serial>.local`. [`NetworkDiscovery`] asks
//! the local network for that name's `A` record and gives up after
//! [`DISCOVERY_TIMEOUT`]. The multicast exchange itself sits behind the
//! [`Responder`] trait: [`MdnsResponder`] talks to the real network, the
//! `mock` feature provides an in-memory one for tests.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

pub mod error;
pub mod mdns;
#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use error::DiscoveryError;
pub use mdns::MdnsResponder;

/// How long a single resolution waits for a matching answer.
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_millis(3000);

/// DNS record type asked for in a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    /// IPv4 address.
    A,
}

/// One question of an mDNS query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub name: String,
    pub record_type: RecordType,
}

/// An mDNS query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub questions: Vec<Question>,
}

impl Query {
    /// A query for the `A` record of `hostname`.
    pub fn a_record(hostname: &str) -> Self {
        Self {
            questions: vec![Question {
                name: hostname.to_string(),
                record_type: RecordType::A,
            }],
        }
    }
}

/// One answer record of an mDNS response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    pub name: String,
    /// Record data; the address text for `A` records.
    pub data: String,
}

/// An mDNS response heard on the multicast group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    pub answers: Vec<Answer>,
}

/// An open multicast query socket.
///
/// Dropping the socket releases it; implementations must free their
/// network resources in `Drop`.
#[async_trait]
pub trait QuerySocket: Send {
    /// Send a query to the multicast group.
    async fn send(&mut self, query: &Query) -> Result<(), DiscoveryError>;

    /// Wait for the next response heard on the group.
    ///
    /// Returns `None` once the socket can deliver no more responses.
    async fn recv(&mut self) -> Option<Response>;
}

/// Opens multicast query sockets.
pub trait Responder: Send + Sync + 'static {
    /// Open a socket. With `loopback` set, queries and answers from this
    /// host are heard as well.
    fn open(&self, loopback: bool) -> Result<Box<dyn QuerySocket>, DiscoveryError>;
}

/// Resolves hostnames to addresses over mDNS.
///
/// Every call issues a fresh query; nothing is cached between calls.
#[derive(Clone)]
pub struct NetworkDiscovery {
    responder: Arc<dyn Responder>,
}

impl NetworkDiscovery {
    pub fn new(responder: impl Responder) -> Self {
        Self {
            responder: Arc::new(responder),
        }
    }

    /// Discovery over the real local network.
    pub fn mdns() -> Self {
        Self::new(MdnsResponder)
    }

    /// Resolve `hostname` to the address in the first answer naming it
    /// exactly.
    pub async fn resolve(&self, hostname: &str) -> Result<IpAddr, DiscoveryError> {
        let query = Query::a_record(hostname);
        // Dropped on every exit path below, which releases the socket.
        let mut socket = self.responder.open(true)?;
        debug!(hostname, "sending mDNS query");

        match tokio::time::timeout(DISCOVERY_TIMEOUT, exchange(socket.as_mut(), &query)).await {
            Ok(Ok(addr)) => {
                info!(hostname, addr = %addr, "resolved device address");
                Ok(addr)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(DiscoveryError::Timeout {
                hostname: hostname.to_string(),
                timeout: DISCOVERY_TIMEOUT,
            }),
        }
    }
}

async fn exchange(socket: &mut dyn QuerySocket, query: &Query) -> Result<IpAddr, DiscoveryError> {
    socket.send(query).await?;
    let name = &query.questions[0].name;

    while let Some(response) = socket.recv().await {
        for answer in response.answers.iter().filter(|a| &a.name == name) {
            match answer.data.parse::<IpAddr>() {
                Ok(addr) => return Ok(addr),
                Err(_) => debug!(name = %answer.name, data = %answer.data, "skipping non-address answer"),
            }
        }
    }

    Err(DiscoveryError::Backend(
        "responder closed before answering".to_string(),
    ))
}
