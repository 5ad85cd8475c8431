//! mdns-sd backed responder.

use std::net::Ipv4Addr;

use async_trait::async_trait;
use mdns_sd::{HostnameResolutionEvent, ServiceDaemon};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::DiscoveryError;
use crate::{Answer, Query, QuerySocket, RecordType, Responder, Response};

/// Resolves names on the real local network through an mdns-sd daemon.
///
/// Each opened socket owns its own daemon, shut down when the socket is
/// dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct MdnsResponder;

impl Responder for MdnsResponder {
    fn open(&self, loopback: bool) -> Result<Box<dyn QuerySocket>, DiscoveryError> {
        let daemon = ServiceDaemon::new().map_err(|e| DiscoveryError::Backend(e.to_string()))?;
        daemon
            .set_multicast_loop_v4(loopback)
            .map_err(|e| DiscoveryError::Backend(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        Ok(Box::new(MdnsSocket {
            daemon,
            resolving: Vec::new(),
            forwarders: Vec::new(),
            tx,
            rx,
        }))
    }
}

struct MdnsSocket {
    daemon: ServiceDaemon,
    /// Fully qualified names with a resolution in flight.
    resolving: Vec<String>,
    forwarders: Vec<JoinHandle<()>>,
    tx: mpsc::UnboundedSender<Response>,
    rx: mpsc::UnboundedReceiver<Response>,
}

/// mdns-sd wants fully qualified names with the trailing root label.
fn fully_qualified(name: &str) -> String {
    if name.ends_with('.') {
        name.to_string()
    } else {
        format!("{name}.")
    }
}

#[async_trait]
impl QuerySocket for MdnsSocket {
    async fn send(&mut self, query: &Query) -> Result<(), DiscoveryError> {
        for question in &query.questions {
            // mdns-sd resolves A and AAAA together; non-IPv4 data is dropped below.
            debug_assert_eq!(question.record_type, RecordType::A);
            let fqdn = fully_qualified(&question.name);
            let events = self
                .daemon
                .resolve_hostname(&fqdn, None)
                .map_err(|e| DiscoveryError::Send(e.to_string()))?;
            self.resolving.push(fqdn);

            let tx = self.tx.clone();
            self.forwarders.push(tokio::spawn(async move {
                while let Ok(event) = events.recv_async().await {
                    match event {
                        HostnameResolutionEvent::AddressesFound(host, addrs) => {
                            let name = host.trim_end_matches('.').to_string();
                            let answers = addrs
                                .iter()
                                .map(ToString::to_string)
                                .filter(|data| data.parse::<Ipv4Addr>().is_ok())
                                .map(|data| Answer {
                                    name: name.clone(),
                                    data,
                                })
                                .collect();
                            if tx.send(Response { answers }).is_err() {
                                break;
                            }
                        }
                        other => trace!(event = ?other, "mDNS resolution event"),
                    }
                }
            }));
            debug!(name = %question.name, "mDNS query sent");
        }
        Ok(())
    }

    async fn recv(&mut self) -> Option<Response> {
        self.rx.recv().await
    }
}

impl Drop for MdnsSocket {
    fn drop(&mut self) {
        for task in &self.forwarders {
            task.abort();
        }
        for name in &self.resolving {
            let _ = self.daemon.stop_resolve_hostname(name);
        }
        if let Err(e) = self.daemon.shutdown() {
            warn!(error = %e, "failed to shut down mDNS daemon");
        }
    }
}
