//! Message channel handle and its actor task.

use futures::{SinkExt, Stream, StreamExt};
use hub_protocol::{ClientFrame, Message, OutgoingMessage, ServerFrame};
use log::{debug, info, warn};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use super::state::{ChannelBinding, ChannelState, CloseReason};
use super::transport::{Connector, Transport, WireFrame};
use crate::config::{AuthAck, ChannelConfig};
use crate::session::{self, SessionContext, SessionCredential, SessionWatch};

/// Events surfaced to the owner of a channel, in transport arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Handshake finished; `send` is now accepted.
    Ready { conversation_id: String },

    /// A `newMessage` frame.
    Message {
        conversation_id: String,
        message: Message,
    },

    /// The handle reached `Closed`. Always the last event.
    Closed {
        conversation_id: String,
        reason: CloseReason,
    },
}

impl ChannelEvent {
    /// The conversation the emitting channel is bound to.
    pub fn conversation_id(&self) -> &str {
        match self {
            ChannelEvent::Ready { conversation_id }
            | ChannelEvent::Message {
                conversation_id, ..
            }
            | ChannelEvent::Closed {
                conversation_id, ..
            } => conversation_id,
        }
    }
}

/// Why a send was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("channel is {0}, message dropped")]
    NotReady(ChannelState),

    #[error("channel is closed, message dropped")]
    Closed,
}

/// Inbound event stream of one channel. Finite and not restartable.
pub struct ChannelEvents {
    conversation_id: String,
    inner: ReceiverStream<ChannelEvent>,
}

impl ChannelEvents {
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.inner.next().await
    }
}

impl Stream for ChannelEvents {
    type Item = ChannelEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Handle to a live connection bound to one conversation.
pub struct MessageChannel {
    conversation_id: String,
    state_tx: Arc<watch::Sender<ChannelState>>,
    state_rx: watch::Receiver<ChannelState>,
    outbound: mpsc::UnboundedSender<OutgoingMessage>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl MessageChannel {
    /// Open a channel for `conversation_id` using the session's current
    /// credential.
    ///
    /// Returns immediately. Connection, authentication and any failure are
    /// reported through the returned event stream; a channel that never
    /// becomes ready is closed after `config.handshake_timeout()`.
    pub fn open(
        conversation_id: impl Into<String>,
        session: &SessionContext,
        connector: Arc<dyn Connector>,
        config: &ChannelConfig,
    ) -> (Self, ChannelEvents) {
        let conversation_id = conversation_id.into();
        let (state_tx, state_rx) = watch::channel(ChannelState::Unbound);
        let state_tx = Arc::new(state_tx);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(config.event_buffer.max(1));
        let cancel = CancellationToken::new();

        let actor = ChannelActor {
            conversation_id: conversation_id.clone(),
            credential: session.current(),
            session: session.subscribe(),
            connector,
            config: config.clone(),
            state: state_tx.clone(),
            outbound: outbound_rx,
            events: event_tx,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(actor.run());

        let channel = Self {
            conversation_id: conversation_id.clone(),
            state_tx,
            state_rx,
            outbound: outbound_tx,
            cancel,
            task,
        };
        let events = ChannelEvents {
            conversation_id,
            inner: ReceiverStream::new(event_rx),
        };
        (channel, events)
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn state(&self) -> ChannelState {
        *self.state_rx.borrow()
    }

    /// Watch state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.state_rx.clone()
    }

    pub fn binding(&self) -> ChannelBinding {
        ChannelBinding {
            conversation_id: self.conversation_id.clone(),
            authenticated: self.state().is_ready(),
        }
    }

    /// Send `content` into the bound conversation.
    ///
    /// Dropped unless the channel is `Ready`. Success only means the frame
    /// was queued; confirmation arrives later as a `Message` event.
    pub fn send(&self, content: impl Into<String>) -> Result<(), SendError> {
        self.send_tagged(content, None)
    }

    /// Like [`send`](Self::send), attaching a client token the server may
    /// echo back.
    pub fn send_tagged(
        &self,
        content: impl Into<String>,
        client_token: Option<String>,
    ) -> Result<(), SendError> {
        match self.state() {
            ChannelState::Ready => {}
            ChannelState::Closed => return Err(SendError::Closed),
            other => return Err(SendError::NotReady(other)),
        }

        self.outbound
            .send(OutgoingMessage {
                conversation_id: self.conversation_id.clone(),
                content: content.into(),
                client_token,
            })
            .map_err(|_| SendError::Closed)
    }

    /// Release the transport. Idempotent; the state is `Closed` when this
    /// returns.
    pub fn close(&self) {
        if transition(&self.state_tx, ChannelState::Closed) {
            debug!("Closing channel for conversation {}", self.conversation_id);
        }
        self.cancel.cancel();
    }

    /// Whether the actor task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for MessageChannel {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for MessageChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageChannel")
            .field("conversation_id", &self.conversation_id)
            .field("state", &self.state())
            .finish()
    }
}

/// Move to `next` unless already `Closed`. Returns whether the state changed.
fn transition(state: &watch::Sender<ChannelState>, next: ChannelState) -> bool {
    state.send_if_modified(|current| {
        if current.is_closed() || *current == next {
            false
        } else {
            *current = next;
            true
        }
    })
}

struct ChannelActor {
    conversation_id: String,
    credential: Option<Arc<SessionCredential>>,
    session: SessionWatch,
    connector: Arc<dyn Connector>,
    config: ChannelConfig,
    state: Arc<watch::Sender<ChannelState>>,
    outbound: mpsc::UnboundedReceiver<OutgoingMessage>,
    events: mpsc::Sender<ChannelEvent>,
    cancel: CancellationToken,
}

impl ChannelActor {
    async fn run(mut self) {
        let reason = self.drive().await;

        transition(&self.state, ChannelState::Closed);
        match reason {
            CloseReason::ClosedByClient => {
                debug!("Channel for conversation {} closed", self.conversation_id)
            }
            ref other => info!(
                "Channel for conversation {} closed: {}",
                self.conversation_id, other
            ),
        }

        let _ = self
            .events
            .send(ChannelEvent::Closed {
                conversation_id: self.conversation_id.clone(),
                reason,
            })
            .await;
    }

    async fn drive(&mut self) -> CloseReason {
        let Some(credential) = self.credential.clone() else {
            return CloseReason::Unauthenticated;
        };

        transition(&self.state, ChannelState::Connecting);

        let timeout = self.config.handshake_timeout();
        let cancel = self.cancel.clone();

        let mut transport = {
            let handshake = Self::handshake(
                &self.conversation_id,
                &credential.token,
                self.connector.as_ref(),
                self.config.auth_ack,
                &self.state,
                &self.events,
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return CloseReason::ClosedByClient,
                _ = session::invalidated(&mut self.session) => return CloseReason::SessionInvalidated,
                result = tokio::time::timeout(timeout, handshake) => match result {
                    Err(_) => {
                        warn!(
                            "Handshake for conversation {} timed out after {:?}",
                            self.conversation_id, timeout
                        );
                        return CloseReason::HandshakeTimeout;
                    }
                    Ok(Err(reason)) => return reason,
                    Ok(Ok(transport)) => transport,
                },
            }
        };

        // close() may have won the race with the final handshake step.
        if !transition(&self.state, ChannelState::Ready) {
            let _ = transport.sink.close().await;
            return CloseReason::ClosedByClient;
        }
        debug!("Channel for conversation {} ready", self.conversation_id);

        if self
            .events
            .send(ChannelEvent::Ready {
                conversation_id: self.conversation_id.clone(),
            })
            .await
            .is_err()
        {
            let _ = transport.sink.close().await;
            return CloseReason::ClosedByClient;
        }

        self.pump(&mut transport).await
    }

    /// Connect, send the auth frame first, and wait for the ack if required.
    async fn handshake(
        conversation_id: &str,
        token: &str,
        connector: &dyn Connector,
        auth_ack: AuthAck,
        state: &watch::Sender<ChannelState>,
        events: &mpsc::Sender<ChannelEvent>,
    ) -> Result<Transport, CloseReason> {
        let mut transport = connector.connect().await?;
        transition(state, ChannelState::Authenticating);

        let auth = ClientFrame::auth(token, conversation_id)
            .encode()
            .map_err(|e| CloseReason::AuthRejected(format!("encoding auth frame: {}", e)))?;
        transport.sink.send(auth).await?;

        if auth_ack == AuthAck::Implicit {
            return Ok(transport);
        }

        loop {
            match transport.stream.next().await {
                Some(Ok(WireFrame::Text(text))) => match ServerFrame::decode(&text) {
                    Ok(ServerFrame::AuthOk) => return Ok(transport),
                    Ok(ServerFrame::AuthError { message }) | Ok(ServerFrame::Error { message }) => {
                        return Err(CloseReason::AuthRejected(
                            message.unwrap_or_else(|| "no reason given".to_string()),
                        ));
                    }
                    Ok(ServerFrame::NewMessage { payload }) => {
                        let event = ChannelEvent::Message {
                            conversation_id: conversation_id.to_string(),
                            message: payload,
                        };
                        if events.send(event).await.is_err() {
                            return Err(CloseReason::ClosedByClient);
                        }
                    }
                    Ok(ServerFrame::Unknown) => {}
                    Err(e) => debug!("Ignoring undecodable frame during auth: {}", e),
                },
                Some(Ok(WireFrame::Close(_))) | None => return Err(CloseReason::RemoteClosed),
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    /// Steady state: forward outbound messages, surface inbound ones.
    async fn pump(&mut self, transport: &mut Transport) -> CloseReason {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    let _ = transport.sink.close().await;
                    return CloseReason::ClosedByClient;
                }
                _ = session::invalidated(&mut self.session) => {
                    let _ = transport.sink.close().await;
                    return CloseReason::SessionInvalidated;
                }
                outgoing = self.outbound.recv() => {
                    let Some(outgoing) = outgoing else {
                        let _ = transport.sink.close().await;
                        return CloseReason::ClosedByClient;
                    };
                    let text = match ClientFrame::message(outgoing).encode() {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Dropping unencodable message: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = transport.sink.send(text).await {
                        return e.into();
                    }
                }
                frame = transport.stream.next() => match frame {
                    Some(Ok(WireFrame::Text(text))) => {
                        if let Some(event) = self.decode(&text)
                            && self.events.send(event).await.is_err()
                        {
                            let _ = transport.sink.close().await;
                            return CloseReason::ClosedByClient;
                        }
                    }
                    Some(Ok(WireFrame::Close(reason))) => {
                        debug!(
                            "Server closed channel for conversation {}: {:?}",
                            self.conversation_id, reason
                        );
                        return CloseReason::RemoteClosed;
                    }
                    None => return CloseReason::RemoteClosed,
                    Some(Err(e)) => return e.into(),
                },
            }
        }
    }

    /// Only `newMessage` becomes an event; everything else is ignored.
    fn decode(&self, text: &str) -> Option<ChannelEvent> {
        match ServerFrame::decode(text) {
            Ok(ServerFrame::NewMessage { payload }) => Some(ChannelEvent::Message {
                conversation_id: self.conversation_id.clone(),
                message: payload,
            }),
            Ok(other) => {
                debug!("Ignoring frame {:?} on {}", other, self.conversation_id);
                None
            }
            Err(e) => {
                debug!(
                    "Ignoring undecodable frame on {}: {}",
                    self.conversation_id, e
                );
                None
            }
        }
    }
}
