//! Conversation directory: the signed-in identity's conversations, fetched
//! once to populate a selector.

use hub_protocol::Conversation;
use log::{debug, warn};

use crate::api::{ApiResult, ChatApi};

/// Read-only snapshot of the conversation list.
#[derive(Debug, Clone, Default)]
pub struct ConversationDirectory {
    conversations: Vec<Conversation>,
    load_error: Option<String>,
}

impl ConversationDirectory {
    /// Fetch the list once, preserving server order.
    pub async fn load(api: &dyn ChatApi) -> ApiResult<Self> {
        let conversations = api.list_conversations().await?;
        debug!("Loaded {} conversations", conversations.len());
        Ok(Self::from_conversations(conversations))
    }

    /// Like [`load`](Self::load), but a failure becomes an empty directory
    /// that remembers the error instead of propagating it.
    pub async fn load_or_empty(api: &dyn ChatApi) -> Self {
        match Self::load(api).await {
            Ok(directory) => directory,
            Err(e) => {
                warn!("Failed to load conversations: {}", e);
                Self {
                    conversations: Vec::new(),
                    load_error: Some(e.to_string()),
                }
            }
        }
    }

    pub fn from_conversations(conversations: Vec<Conversation>) -> Self {
        Self {
            conversations,
            load_error: None,
        }
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn find(&self, id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    /// The load failure, if the fetch did not succeed.
    pub fn load_error(&self) -> Option<&str> {
        self.load_error.as_deref()
    }
}
