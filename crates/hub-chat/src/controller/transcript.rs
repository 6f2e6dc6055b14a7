//! Ordered message list of the selected conversation.
//!
//! Persisted entries come first, in server order, followed by pending
//! entries in send order. A pending entry is only ever removed by a
//! client-token match; under the `preserve` policy it stays next to its echo.

use hub_protocol::Message;
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::ReconcilePolicy;

/// Delivery state of an optimistic entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingStatus {
    /// Handed to a ready channel; no echo yet.
    Sending,
    /// The channel was not ready. Never retried.
    Unsent,
    /// No echo within the pending timeout.
    Expired,
}

/// A locally sent message the server has not confirmed.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMessage {
    /// `pending-<uuid>`; never collides with a server id.
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub client_token: Option<String>,
    pub status: PendingStatus,
    pub sent_at: Instant,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptEntry {
    Persisted(Message),
    Pending(PendingMessage),
}

impl TranscriptEntry {
    pub fn id(&self) -> &str {
        match self {
            TranscriptEntry::Persisted(m) => &m.id,
            TranscriptEntry::Pending(p) => &p.id,
        }
    }

    pub fn sender_id(&self) -> &str {
        match self {
            TranscriptEntry::Persisted(m) => &m.sender_id,
            TranscriptEntry::Pending(p) => &p.sender_id,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            TranscriptEntry::Persisted(m) => &m.content,
            TranscriptEntry::Pending(p) => &p.content,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, TranscriptEntry::Pending(_))
    }
}

/// Result of applying one live message.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveOutcome {
    Appended,
    /// Appended, and the pending entry with this id was dropped.
    Replaced { pending_id: String },
    /// Already in the transcript.
    Duplicate,
}

#[derive(Debug, Clone, Default)]
pub struct Transcript {
    persisted: Vec<Message>,
    pending: Vec<PendingMessage>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn persisted(&self) -> &[Message] {
        &self.persisted
    }

    pub fn pending(&self) -> &[PendingMessage] {
        &self.pending
    }

    pub fn len(&self) -> usize {
        self.persisted.len() + self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The visible list.
    pub fn entries(&self) -> Vec<TranscriptEntry> {
        self.persisted
            .iter()
            .cloned()
            .map(TranscriptEntry::Persisted)
            .chain(self.pending.iter().cloned().map(TranscriptEntry::Pending))
            .collect()
    }

    /// Install a history response.
    ///
    /// History wins for every id it contains; live messages that arrived
    /// while the fetch was in flight and are absent from it are kept after
    /// it, in arrival order.
    pub fn apply_history(&mut self, history: Vec<Message>, policy: ReconcilePolicy) {
        let known: HashSet<&str> = history.iter().map(|m| m.id.as_str()).collect();
        let live: Vec<Message> = self
            .persisted
            .drain(..)
            .filter(|m| !known.contains(m.id.as_str()))
            .collect();

        if policy == ReconcilePolicy::ClientToken {
            let tokens: HashSet<&str> = history
                .iter()
                .filter_map(|m| m.client_token.as_deref())
                .collect();
            self.pending.retain(|p| {
                p.client_token
                    .as_deref()
                    .is_none_or(|token| !tokens.contains(token))
            });
        }

        self.persisted = history;
        self.persisted.extend(live);
    }

    /// Append a message pushed by the channel.
    pub fn push_live(&mut self, message: Message, policy: ReconcilePolicy) -> LiveOutcome {
        if self.persisted.iter().any(|m| m.id == message.id) {
            return LiveOutcome::Duplicate;
        }

        let replaced = match (policy, message.client_token.as_deref()) {
            (ReconcilePolicy::ClientToken, Some(token)) => self
                .pending
                .iter()
                .position(|p| p.client_token.as_deref() == Some(token))
                .map(|index| self.pending.remove(index).id),
            _ => None,
        };

        self.persisted.push(message);
        match replaced {
            Some(pending_id) => LiveOutcome::Replaced { pending_id },
            None => LiveOutcome::Appended,
        }
    }

    pub fn push_pending(&mut self, pending: PendingMessage) {
        self.pending.push(pending);
    }

    pub fn set_pending_status(&mut self, pending_id: &str, status: PendingStatus) {
        if let Some(p) = self.pending.iter_mut().find(|p| p.id == pending_id) {
            p.status = status;
        }
    }

    /// Earliest instant at which an unconfirmed entry expires. Entries that
    /// never left the client stay `Unsent`.
    pub fn next_expiry(&self, timeout: Duration) -> Option<Instant> {
        self.pending
            .iter()
            .filter(|p| p.status == PendingStatus::Sending)
            .map(|p| p.sent_at + timeout)
            .min()
    }

    /// Mark entries older than `timeout` as expired. Returns their ids.
    pub fn expire_pending(&mut self, now: Instant, timeout: Duration) -> Vec<String> {
        self.pending
            .iter_mut()
            .filter(|p| p.status == PendingStatus::Sending && p.sent_at + timeout <= now)
            .map(|p| {
                p.status = PendingStatus::Expired;
                p.id.clone()
            })
            .collect()
    }
}
