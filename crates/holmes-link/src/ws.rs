use std::sync::Once;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace};
use url::Url;

use crate::error::TransportError;
use crate::transport::{Connector, Transport};

/// Opens WebSocket links with `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Transport>, TransportError> {
        if url.scheme() == "wss" {
            install_crypto_provider();
        }
        let (stream, _response) = connect_async(url.as_str()).await.map_err(|err| match err {
            tungstenite::Error::Io(io) => TransportError::Refused(io.to_string()),
            other => TransportError::from(other),
        })?;
        debug!(target: "holmes::link::ws", url = %url, "websocket established");
        Ok(Box::new(WsTransport { stream }))
    }
}

/// rustls refuses to handshake without a process-level provider.
fn install_crypto_provider() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        if rustls::crypto::CryptoProvider::get_default().is_some() {
            return;
        }
        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
        {
            trace!(target: "holmes::link::ws", "crypto provider installed concurrently");
        }
    });
}

pub struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(TransportError::from)
    }

    async fn recv_text(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => {
                        trace!(target: "holmes::link::ws", "ignoring non-utf8 binary frame");
                    }
                },
                Ok(Message::Close(_)) => return None,
                // tungstenite answers pings itself
                Ok(_) => {}
                Err(err) => {
                    return match TransportError::from(err) {
                        TransportError::Closed => None,
                        other => Some(Err(other)),
                    };
                }
            }
        }
    }

    async fn close(&mut self) {
        if let Err(err) = self.stream.close(None).await {
            trace!(target: "holmes::link::ws", error = %err, "close handshake failed");
        }
    }
}

impl From<tungstenite::Error> for TransportError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                TransportError::Closed
            }
            tungstenite::Error::Io(io) => TransportError::Io(io.to_string()),
            other => TransportError::Protocol(other.to_string()),
        }
    }
}
