use async_trait::async_trait;
use url::Url;

use crate::error::TransportError;

/// One established duplex connection carrying text frames.
///
/// `recv_text` must be cancel-safe: the connection driver polls it inside
/// `tokio::select!` alongside outbound traffic and heartbeats.
#[async_trait]
pub trait Transport: Send {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Next inbound text frame. `None` once the peer has closed the link.
    async fn recv_text(&mut self) -> Option<Result<String, TransportError>>;

    async fn close(&mut self);
}

/// Opens transports. The manager wraps every call in the connect timeout, so
/// implementations do not need their own.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Transport>, TransportError>;
}
