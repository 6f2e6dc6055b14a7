//! In-memory transport for exercising the channel actor without a socket.

use async_trait::async_trait;
use futures::channel::mpsc as fmpsc;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use super::state::ChannelState;
use super::transport::{Connector, Transport, TransportError, WireFrame};

#[derive(Clone, Copy)]
enum Mode {
    Accept,
    Stall,
    Refuse,
}

/// Hands each connection's server side to the test as a [`MemoryPeer`].
pub(crate) struct MemoryConnector {
    mode: Mode,
    peers: mpsc::UnboundedSender<MemoryPeer>,
}

impl MemoryConnector {
    pub(crate) fn new() -> (Arc<dyn Connector>, mpsc::UnboundedReceiver<MemoryPeer>) {
        Self::with_mode(Mode::Accept)
    }

    /// `connect` never completes.
    pub(crate) fn stalled() -> (Arc<dyn Connector>, mpsc::UnboundedReceiver<MemoryPeer>) {
        Self::with_mode(Mode::Stall)
    }

    /// `connect` fails immediately.
    pub(crate) fn refusing() -> (Arc<dyn Connector>, mpsc::UnboundedReceiver<MemoryPeer>) {
        Self::with_mode(Mode::Refuse)
    }

    fn with_mode(mode: Mode) -> (Arc<dyn Connector>, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { mode, peers: tx }), rx)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<Transport, TransportError> {
        match self.mode {
            Mode::Stall => std::future::pending().await,
            Mode::Refuse => Err(TransportError::Connect {
                url: "memory://".to_string(),
                message: "connection refused".to_string(),
            }),
            Mode::Accept => {
                let (client_tx, server_rx) = fmpsc::unbounded::<String>();
                let (server_tx, client_rx) = fmpsc::unbounded();

                let _ = self.peers.send(MemoryPeer {
                    received: server_rx,
                    outgoing: server_tx,
                });

                let sink = client_tx.sink_map_err(|_| TransportError::Closed);
                Ok(Transport::new(Box::pin(sink), Box::pin(client_rx)))
            }
        }
    }
}

/// Server side of one in-memory connection.
pub(crate) struct MemoryPeer {
    received: fmpsc::UnboundedReceiver<String>,
    outgoing: fmpsc::UnboundedSender<Result<WireFrame, TransportError>>,
}

impl MemoryPeer {
    /// Next frame the client wrote, parsed as JSON.
    pub(crate) async fn next_frame(&mut self) -> Option<Value> {
        let text = self.received.next().await?;
        Some(serde_json::from_str(&text).expect("client wrote invalid JSON"))
    }

    pub(crate) fn push(&self, frame: Value) {
        self.push_raw(&frame.to_string());
    }

    pub(crate) fn push_raw(&self, text: &str) {
        let _ = self
            .outgoing
            .unbounded_send(Ok(WireFrame::Text(text.to_string())));
    }

    pub(crate) fn hang_up(&self) {
        let _ = self.outgoing.unbounded_send(Ok(WireFrame::Close(None)));
    }

    /// Resolves once the client has released its side of the connection.
    pub(crate) async fn wait_closed(&mut self) {
        while self.received.next().await.is_some() {}
    }
}

/// A `newMessage` frame as the server would push it.
pub(crate) fn message_frame(id: &str, conversation_id: &str, sender_id: &str, content: &str) -> Value {
    json!({
        "type": "newMessage",
        "payload": {
            "_id": id,
            "conversation_id": conversation_id,
            "sender_id": sender_id,
            "content": content,
            "createdAt": "2024-02-01T10:00:00.000Z"
        }
    })
}

pub(crate) async fn wait_for(state: &mut watch::Receiver<ChannelState>, target: ChannelState) {
    tokio::time::timeout(
        std::time::Duration::from_secs(2),
        state.wait_for(|s| *s == target),
    )
    .await
    .expect("timed out waiting for channel state")
    .expect("channel state sender dropped");
}
