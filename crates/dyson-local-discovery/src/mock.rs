//! In-memory mDNS responder for testing.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::DiscoveryError;
use crate::{Answer, Query, QuerySocket, Responder, Response};

#[derive(Clone)]
struct Record {
    name: String,
    data: String,
    delay: Duration,
}

#[derive(Default)]
struct Shared {
    records: Mutex<Vec<Record>>,
    open: AtomicUsize,
    queries: AtomicUsize,
    fail_sends: AtomicBool,
}

/// Mock responder answering from a fixed record table.
///
/// Every query is answered with every record, matching or not, the way a
/// busy multicast group would. Clones share state, so a test can keep one
/// handle and give another to the code under test.
#[derive(Clone, Default)]
pub struct MockResponder {
    shared: Arc<Shared>,
}

impl MockResponder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer queries immediately with `name -> data`.
    pub fn answer(&self, name: &str, data: &str) {
        self.answer_after(name, data, Duration::ZERO);
    }

    /// Answer queries with `name -> data` after `delay`.
    pub fn answer_after(&self, name: &str, data: &str, delay: Duration) {
        self.shared.records.lock().unwrap().push(Record {
            name: name.to_string(),
            data: data.to_string(),
            delay,
        });
    }

    /// Make every subsequent send fail.
    pub fn fail_sends(&self) {
        self.shared.fail_sends.store(true, Ordering::SeqCst);
    }

    /// Number of sockets opened and not yet dropped.
    pub fn open_sockets(&self) -> usize {
        self.shared.open.load(Ordering::SeqCst)
    }

    /// Number of queries sent over all sockets.
    pub fn queries_sent(&self) -> usize {
        self.shared.queries.load(Ordering::SeqCst)
    }
}

impl Responder for MockResponder {
    fn open(&self, _loopback: bool) -> Result<Box<dyn QuerySocket>, DiscoveryError> {
        self.shared.open.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        Ok(Box::new(MockSocket {
            shared: self.shared.clone(),
            tx,
            rx,
            delayed: Vec::new(),
        }))
    }
}

struct MockSocket {
    shared: Arc<Shared>,
    tx: mpsc::UnboundedSender<Response>,
    rx: mpsc::UnboundedReceiver<Response>,
    delayed: Vec<JoinHandle<()>>,
}

#[async_trait]
impl QuerySocket for MockSocket {
    async fn send(&mut self, _query: &Query) -> Result<(), DiscoveryError> {
        if self.shared.fail_sends.load(Ordering::SeqCst) {
            return Err(DiscoveryError::Send("mock send failure".to_string()));
        }
        self.shared.queries.fetch_add(1, Ordering::SeqCst);

        let records = self.shared.records.lock().unwrap().clone();
        for record in records {
            let response = Response {
                answers: vec![Answer {
                    name: record.name,
                    data: record.data,
                }],
            };
            if record.delay.is_zero() {
                let _ = self.tx.send(response);
            } else {
                let tx = self.tx.clone();
                self.delayed.push(tokio::spawn(async move {
                    tokio::time::sleep(record.delay).await;
                    let _ = tx.send(response);
                }));
            }
        }
        Ok(())
    }

    async fn recv(&mut self) -> Option<Response> {
        self.rx.recv().await
    }
}

impl Drop for MockSocket {
    fn drop(&mut self) {
        for task in &self.delayed {
            task.abort();
        }
        self.shared.open.fetch_sub(1, Ordering::SeqCst);
    }
}
