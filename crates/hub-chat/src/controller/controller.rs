//! Selection, history, live updates and optimistic sends for one
//! conversation at a time.

use futures::StreamExt;
use hub_protocol::{Conversation, Identity, Message, Role};
use log::{debug, info, warn};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::transcript::{LiveOutcome, PendingMessage, PendingStatus, Transcript, TranscriptEntry};
use crate::api::{ApiError, ApiResult, ChatApi};
use crate::channel::{
    ChannelEvent, ChannelEvents, ChannelState, CloseReason, Connector, MessageChannel, SendError,
};
use crate::config::{ChannelConfig, ChatConfig, ReconcilePolicy};
use crate::directory::ConversationDirectory;
use crate::session::{self, SessionContext, SessionWatch};

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Not signed in")]
    NotAuthenticated,

    #[error("Unknown conversation: {0}")]
    UnknownConversation(String),

    #[error("Only students can start conversations (signed in as {role})")]
    RoleNotPermitted { role: Role },

    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Settings the controller hands to its channels and transcript.
#[derive(Debug, Clone, Default)]
pub struct ControllerConfig {
    pub channel: ChannelConfig,
    pub chat: ChatConfig,
}

/// What changed after applying one event.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewUpdate {
    HistoryLoaded {
        conversation_id: String,
        count: usize,
    },
    HistoryFailed {
        conversation_id: String,
        error: String,
    },
    Appended(TranscriptEntry),
    /// A live echo confirmed the pending entry `pending_id`.
    Replaced {
        pending_id: String,
        message: Message,
    },
    ChannelReady {
        conversation_id: String,
    },
    ChannelClosed {
        conversation_id: String,
        reason: CloseReason,
    },
    PendingExpired {
        pending_ids: Vec<String>,
    },
    /// The session changed; selection and transcript are gone.
    SignedOut,
    /// Stale or duplicate; nothing visible changed.
    Ignored,
}

/// Result of [`ConversationController::send_message`].
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// Empty or whitespace-only content.
    Skipped,
    NoSelection,
    /// Handed to the channel; awaiting the echo.
    Sent { pending_id: String },
    /// Shown as pending but never transmitted.
    Unsent {
        pending_id: String,
        reason: SendError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryState {
    Loading,
    Loaded,
    Failed(String),
}

enum ControllerEvent {
    HistoryLoaded {
        generation: u64,
        conversation_id: String,
        result: ApiResult<Vec<Message>>,
    },
    Channel {
        generation: u64,
        event: ChannelEvent,
    },
}

impl ControllerEvent {
    fn tag(&self) -> (u64, &str) {
        match self {
            ControllerEvent::HistoryLoaded {
                generation,
                conversation_id,
                ..
            } => (*generation, conversation_id),
            ControllerEvent::Channel { generation, event } => (*generation, event.conversation_id()),
        }
    }
}

struct Selection {
    conversation: Conversation,
    generation: u64,
    channel: MessageChannel,
    forwarder: JoinHandle<()>,
    history: HistoryState,
    transcript: Transcript,
}

impl Selection {
    fn release(self) {
        self.channel.close();
        self.forwarder.abort();
    }
}

pub struct ConversationController {
    api: Arc<dyn ChatApi>,
    session: SessionContext,
    session_watch: SessionWatch,
    identity: Identity,
    connector: Arc<dyn Connector>,
    config: ControllerConfig,
    directory: ConversationDirectory,
    selection: Option<Selection>,
    generation: u64,
    inbox_tx: mpsc::UnboundedSender<ControllerEvent>,
    inbox_rx: mpsc::UnboundedReceiver<ControllerEvent>,
    signed_out: bool,
}

impl ConversationController {
    /// Load the directory once and optionally select `initial_id`.
    ///
    /// A failed directory load leaves an empty directory carrying the error.
    /// An `initial_id` not in the directory selects nothing.
    pub async fn mount(
        api: Arc<dyn ChatApi>,
        session: SessionContext,
        connector: Arc<dyn Connector>,
        config: ControllerConfig,
        initial_id: Option<&str>,
    ) -> Result<Self, ChatError> {
        let identity = session.identity().ok_or(ChatError::NotAuthenticated)?;
        let session_watch = session.subscribe();
        let directory = ConversationDirectory::load_or_empty(api.as_ref()).await;
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();

        let mut controller = Self {
            api,
            session,
            session_watch,
            identity,
            connector,
            config,
            directory,
            selection: None,
            generation: 0,
            inbox_tx,
            inbox_rx,
            signed_out: false,
        };

        if let Some(id) = initial_id
            && let Err(e) = controller.select_by_id(id)
        {
            warn!("Not selecting initial conversation: {}", e);
        }

        Ok(controller)
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn directory(&self) -> &ConversationDirectory {
        &self.directory
    }

    pub fn selected(&self) -> Option<&Conversation> {
        self.selection.as_ref().map(|s| &s.conversation)
    }

    pub fn selected_id(&self) -> Option<&str> {
        self.selected().map(|c| c.id.as_str())
    }

    pub fn transcript(&self) -> Option<&Transcript> {
        self.selection.as_ref().map(|s| &s.transcript)
    }

    pub fn history_state(&self) -> Option<&HistoryState> {
        self.selection.as_ref().map(|s| &s.history)
    }

    pub fn channel_state(&self) -> Option<ChannelState> {
        self.selection.as_ref().map(|s| s.channel.state())
    }

    pub fn is_signed_out(&self) -> bool {
        self.signed_out
    }

    /// Select a directory entry by id.
    pub fn select_by_id(&mut self, conversation_id: &str) -> Result<(), ChatError> {
        let conversation = self
            .directory
            .find(conversation_id)
            .cloned()
            .ok_or_else(|| ChatError::UnknownConversation(conversation_id.to_string()))?;
        self.select_conversation(conversation);
        Ok(())
    }

    /// Bind to `conversation`.
    ///
    /// The previous channel is closed first. The history fetch and the new
    /// channel then race; their results are applied by `next_update`.
    /// Selecting the already selected conversation starts over.
    pub fn select_conversation(&mut self, conversation: Conversation) {
        if self.signed_out {
            warn!("Ignoring selection of {} after sign-out", conversation.id);
            return;
        }

        if let Some(previous) = self.selection.take() {
            debug!("Releasing conversation {}", previous.conversation.id);
            previous.release();
        }

        self.generation += 1;
        let generation = self.generation;
        let conversation_id = conversation.id.clone();
        info!("Selecting conversation {}", conversation_id);

        let api = self.api.clone();
        let inbox = self.inbox_tx.clone();
        let fetch_id = conversation_id.clone();
        tokio::spawn(async move {
            let result = api.list_messages(&fetch_id).await;
            let _ = inbox.send(ControllerEvent::HistoryLoaded {
                generation,
                conversation_id: fetch_id,
                result,
            });
        });

        let (channel, events) = MessageChannel::open(
            conversation_id,
            &self.session,
            self.connector.clone(),
            &self.config.channel,
        );
        let forwarder = tokio::spawn(forward(generation, events, self.inbox_tx.clone()));

        self.selection = Some(Selection {
            conversation,
            generation,
            channel,
            forwarder,
            history: HistoryState::Loading,
            transcript: Transcript::new(),
        });
    }

    /// Close the channel and clear the selection.
    pub fn deselect(&mut self) {
        if let Some(selection) = self.selection.take() {
            selection.release();
        }
    }

    /// Optimistically append `content` and hand it to the channel.
    pub fn send_message(&mut self, content: &str) -> SendOutcome {
        if content.trim().is_empty() {
            return SendOutcome::Skipped;
        }
        let policy = self.config.chat.reconcile;
        let sender_id = self.identity.id.clone();
        let Some(selection) = self.selection.as_mut() else {
            return SendOutcome::NoSelection;
        };

        let client_token =
            (policy == ReconcilePolicy::ClientToken).then(|| uuid::Uuid::new_v4().to_string());
        let pending_id = format!("pending-{}", uuid::Uuid::new_v4());

        selection.transcript.push_pending(PendingMessage {
            id: pending_id.clone(),
            conversation_id: selection.conversation.id.clone(),
            sender_id,
            content: content.to_string(),
            client_token: client_token.clone(),
            status: PendingStatus::Sending,
            sent_at: Instant::now(),
        });

        match selection.channel.send_tagged(content, client_token) {
            Ok(()) => SendOutcome::Sent { pending_id },
            Err(reason) => {
                warn!("Message not sent: {}", reason);
                selection
                    .transcript
                    .set_pending_status(&pending_id, PendingStatus::Unsent);
                SendOutcome::Unsent { pending_id, reason }
            }
        }
    }

    /// Start a conversation about a listing. See [`contact_landlord`].
    pub async fn contact_landlord(
        &self,
        listing_ref: &str,
        landlord_id: &str,
    ) -> Result<String, ChatError> {
        contact_landlord(self.api.as_ref(), &self.identity, listing_ref, landlord_id).await
    }

    /// Wait for the next asynchronous result and apply it.
    pub async fn next_update(&mut self) -> ViewUpdate {
        let expiry = self.next_expiry();

        tokio::select! {
            biased;
            _ = session::invalidated(&mut self.session_watch), if !self.signed_out => {
                self.sign_out()
            }
            Some(event) = self.inbox_rx.recv() => self.apply(event),
            _ = tokio::time::sleep_until(expiry.unwrap_or_else(Instant::now)), if expiry.is_some() => {
                self.expire_pending()
            }
        }
    }

    fn next_expiry(&self) -> Option<Instant> {
        if self.config.chat.reconcile != ReconcilePolicy::ClientToken {
            return None;
        }
        self.selection
            .as_ref()?
            .transcript
            .next_expiry(self.config.chat.pending_timeout())
    }

    fn expire_pending(&mut self) -> ViewUpdate {
        let timeout = self.config.chat.pending_timeout();
        let Some(selection) = self.selection.as_mut() else {
            return ViewUpdate::Ignored;
        };
        let pending_ids = selection.transcript.expire_pending(Instant::now(), timeout);
        if pending_ids.is_empty() {
            return ViewUpdate::Ignored;
        }
        debug!("{} pending messages expired", pending_ids.len());
        ViewUpdate::PendingExpired { pending_ids }
    }

    fn sign_out(&mut self) -> ViewUpdate {
        info!("Session changed, signing out of conversations");
        self.signed_out = true;
        self.deselect();
        ViewUpdate::SignedOut
    }

    fn apply(&mut self, event: ControllerEvent) -> ViewUpdate {
        let policy = self.config.chat.reconcile;
        let Some(selection) = self.selection.as_mut() else {
            debug!("Dropping event with no selection");
            return ViewUpdate::Ignored;
        };

        let (generation, conversation_id) = event.tag();
        if generation != selection.generation || conversation_id != selection.conversation.id {
            debug!(
                "Dropping stale event for {} (generation {}, current {})",
                conversation_id, generation, selection.generation
            );
            return ViewUpdate::Ignored;
        }

        match event {
            ControllerEvent::HistoryLoaded {
                conversation_id,
                result,
                ..
            } => match result {
                Ok(messages) => {
                    let count = messages.len();
                    selection.transcript.apply_history(messages, policy);
                    selection.history = HistoryState::Loaded;
                    ViewUpdate::HistoryLoaded {
                        conversation_id,
                        count,
                    }
                }
                Err(e) => {
                    warn!("Failed to load history for {}: {}", conversation_id, e);
                    let error = e.to_string();
                    selection.history = HistoryState::Failed(error.clone());
                    ViewUpdate::HistoryFailed {
                        conversation_id,
                        error,
                    }
                }
            },

            ControllerEvent::Channel { event, .. } => match event {
                ChannelEvent::Ready { conversation_id } => {
                    ViewUpdate::ChannelReady { conversation_id }
                }
                ChannelEvent::Closed {
                    conversation_id,
                    reason,
                } => ViewUpdate::ChannelClosed {
                    conversation_id,
                    reason,
                },
                ChannelEvent::Message { message, .. } => {
                    if message.conversation_id != selection.conversation.id {
                        debug!(
                            "Dropping message {} addressed to {}",
                            message.id, message.conversation_id
                        );
                        return ViewUpdate::Ignored;
                    }
                    match selection.transcript.push_live(message.clone(), policy) {
                        LiveOutcome::Appended => {
                            ViewUpdate::Appended(TranscriptEntry::Persisted(message))
                        }
                        LiveOutcome::Replaced { pending_id } => {
                            ViewUpdate::Replaced {
                                pending_id,
                                message,
                            }
                        }
                        LiveOutcome::Duplicate => ViewUpdate::Ignored,
                    }
                }
            },
        }
    }
}

impl Drop for ConversationController {
    fn drop(&mut self) {
        self.deselect();
    }
}

/// Relay one channel's events into the controller inbox, tagged with the
/// selection they belong to.
async fn forward(
    generation: u64,
    mut events: ChannelEvents,
    inbox: mpsc::UnboundedSender<ControllerEvent>,
) {
    while let Some(event) = events.next().await {
        if inbox
            .send(ControllerEvent::Channel { generation, event })
            .is_err()
        {
            break;
        }
    }
}

/// Ask the backend for a conversation between the signed-in student and the
/// landlord of `listing_ref`. Returns the conversation id.
pub async fn contact_landlord(
    api: &dyn ChatApi,
    identity: &Identity,
    listing_ref: &str,
    landlord_id: &str,
) -> Result<String, ChatError> {
    if identity.role != Role::Student {
        return Err(ChatError::RoleNotPermitted {
            role: identity.role,
        });
    }
    let conversation_id = api.start_conversation(listing_ref, landlord_id).await?;
    info!("Started conversation {}", conversation_id);
    Ok(conversation_id)
}
