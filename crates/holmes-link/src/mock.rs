//! Scripted in-memory connector for tests and offline runs.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use url::Url;

use crate::endpoint::EndpointId;
use crate::envelope::Envelope;
use crate::error::TransportError;
use crate::manager::ConnectionHandle;
use crate::transport::{Connector, Transport};

/// A handle as the manager would report it for attempt `epoch`, for
/// driving programs without a manager.
pub fn handle(endpoint: EndpointId, epoch: u64) -> ConnectionHandle {
    ConnectionHandle { endpoint, epoch }
}

/// What the next connection attempt does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt {
    /// Succeed and hand the server side to the test as a [`MockPeer`].
    Accept,
    /// Fail immediately.
    Refuse(String),
    /// Never complete; only the connect timeout ends it.
    Hang,
}

#[derive(Clone)]
pub struct MockConnector {
    inner: Arc<MockInner>,
}

struct MockInner {
    plan: Mutex<VecDeque<Attempt>>,
    urls: Mutex<Vec<Url>>,
    attempts: AtomicUsize,
    peers: mpsc::UnboundedSender<MockPeer>,
}

impl MockConnector {
    /// Returns the connector and the stream of accepted server sides.
    /// Attempts beyond the scripted plan are refused.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MockPeer>) {
        let (peers, peer_rx) = mpsc::unbounded_channel();
        let connector = Self {
            inner: Arc::new(MockInner {
                plan: Mutex::new(VecDeque::new()),
                urls: Mutex::new(Vec::new()),
                attempts: AtomicUsize::new(0),
                peers,
            }),
        };
        (connector, peer_rx)
    }

    pub fn push(&self, attempt: Attempt) {
        self.inner.plan.lock().push_back(attempt);
    }

    pub fn script(&self, attempts: impl IntoIterator<Item = Attempt>) {
        self.inner.plan.lock().extend(attempts);
    }

    /// Number of connection attempts made so far.
    pub fn attempts(&self) -> usize {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<Url> {
        self.inner.urls.lock().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Transport>, TransportError> {
        self.inner.attempts.fetch_add(1, Ordering::SeqCst);
        self.inner.urls.lock().push(url.clone());
        let attempt = self
            .inner
            .plan
            .lock()
            .pop_front()
            .unwrap_or_else(|| Attempt::Refuse("no scripted attempt".into()));
        match attempt {
            Attempt::Accept => {
                let (to_client, client_rx) = mpsc::unbounded_channel();
                let (client_tx, from_client) = mpsc::unbounded_channel();
                let peer = MockPeer {
                    url: url.clone(),
                    to_client: Some(to_client),
                    from_client,
                };
                self.inner
                    .peers
                    .send(peer)
                    .map_err(|_| TransportError::Refused("mock peer receiver dropped".into()))?;
                Ok(Box::new(MockTransport {
                    tx: client_tx,
                    rx: client_rx,
                    open: true,
                }))
            }
            Attempt::Refuse(reason) => Err(TransportError::Refused(reason)),
            Attempt::Hang => std::future::pending().await,
        }
    }
}

/// Server side of an accepted mock connection.
pub struct MockPeer {
    pub url: Url,
    to_client: Option<mpsc::UnboundedSender<Result<String, TransportError>>>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl MockPeer {
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.to_client
            .as_ref()
            .is_some_and(|tx| tx.send(Ok(text.into())).is_ok())
    }

    pub fn send_envelope(&self, envelope: &Envelope) -> bool {
        match envelope.encode() {
            Ok(text) => self.send_text(text),
            Err(_) => false,
        }
    }

    /// Deliver a transport error to the client.
    pub fn fail(&self, error: TransportError) -> bool {
        self.to_client
            .as_ref()
            .is_some_and(|tx| tx.send(Err(error)).is_ok())
    }

    /// Close from the server side; the client observes end-of-stream.
    pub fn hang_up(&mut self) {
        self.to_client = None;
    }

    /// Next frame written by the client, `None` once the client is gone.
    pub async fn recv(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    pub async fn recv_envelope(&mut self) -> Option<Envelope> {
        let text = self.recv().await?;
        Envelope::decode(&text).ok()
    }
}

struct MockTransport {
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<Result<String, TransportError>>,
    open: bool,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        self.tx.send(text).map_err(|_| TransportError::Closed)
    }

    async fn recv_text(&mut self) -> Option<Result<String, TransportError>> {
        if !self.open {
            return None;
        }
        self.rx.recv().await
    }

    async fn close(&mut self) {
        self.open = false;
        self.rx.close();
    }
}
