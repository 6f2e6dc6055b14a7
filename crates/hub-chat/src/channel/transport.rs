//! Transport seam between the channel actor and the physical socket.
//!
//! The actor only needs a sink of text frames and a stream of inbound
//! frames; [`WsConnector`] provides both over `tokio-tungstenite`.

use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt, future};
use log::debug;
use std::pin::Pin;
use std::sync::Once;
use thiserror::Error;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as TungsteniteMessage;

/// Transport-level failures. Terminal for the handle; never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("failed to connect to {url}: {message}")]
    Connect { url: String, message: String },

    #[error("websocket error: {0}")]
    Socket(String),

    #[error("connection closed")]
    Closed,
}

/// An inbound frame the actor cares about. Pings, pongs and binary frames
/// are handled or dropped by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    Text(String),
    Close(Option<String>),
}

pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<WireFrame, TransportError>> + Send>>;

/// A connected, ready transport.
pub struct Transport {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl Transport {
    pub fn new(sink: FrameSink, stream: FrameStream) -> Self {
        Self { sink, stream }
    }
}

/// Produces ready transports. One call, one physical connection.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Transport, TransportError>;
}

/// WebSocket connector. The credential is never sent as a connection
/// header; it travels only in the auth frame.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Transport, TransportError> {
        debug!("Connecting to chat socket at {}", self.url);
        install_crypto_provider();

        let (socket, _response) =
            connect_async(self.url.as_str())
                .await
                .map_err(|e| TransportError::Connect {
                    url: self.url.clone(),
                    message: e.to_string(),
                })?;

        let (write, read) = socket.split();

        let sink = write
            .sink_map_err(|e| TransportError::Socket(e.to_string()))
            .with(|text: String| {
                future::ready(Ok::<_, TransportError>(TungsteniteMessage::Text(
                    text.into(),
                )))
            });

        let stream = read.filter_map(|item| {
            future::ready(match item {
                Ok(TungsteniteMessage::Text(text)) => Some(Ok(WireFrame::Text(text.to_string()))),
                Ok(TungsteniteMessage::Close(frame)) => Some(Ok(WireFrame::Close(
                    frame.map(|f| f.reason.to_string()),
                ))),
                Ok(_) => None,
                Err(e) => Some(Err(TransportError::Socket(e.to_string()))),
            })
        });

        Ok(Transport::new(Box::pin(sink), Box::pin(stream)))
    }
}

/// `wss://` needs a process-wide rustls provider. One installed earlier
/// stays in place.
fn install_crypto_provider() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_refused_is_reported() {
        // Port 9 (discard) is not listening on loopback in test environments.
        let connector = WsConnector::new("ws://127.0.0.1:9/");
        match connector.connect().await {
            Err(TransportError::Connect { url, .. }) => assert_eq!(url, "ws://127.0.0.1:9/"),
            Err(other) => panic!("Expected connect error, got {:?}", other),
            Ok(_) => panic!("Expected connect error, got a transport"),
        }
    }

    #[tokio::test]
    async fn test_secure_url_reaches_tls_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // Hang up on every client mid-handshake.
            while let Ok((stream, _)) = listener.accept().await {
                drop(stream);
            }
        });

        let connector = WsConnector::new(format!("wss://{addr}/ws"));
        match connector.connect().await {
            Err(TransportError::Connect { message, .. }) => {
                assert!(
                    !message.contains("TLS support not compiled in"),
                    "wss rejected before connecting: {message}"
                );
            }
            Err(other) => panic!("Expected connect error, got {:?}", other),
            Ok(_) => panic!("Expected connect error, got a transport"),
        }
    }
}
