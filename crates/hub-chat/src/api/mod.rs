//! REST client for the Housing Hub collaborator endpoints.
//!
//! Everything here is request/response: conversation listing, message
//! history, starting a conversation and login. Every call except login
//! carries `Authorization: Bearer <token>` from the [`SessionContext`].
//!
//! [`SessionContext`]: crate::session::SessionContext

mod client;
mod error;

pub use client::HubApiClient;
pub use error::{ApiError, ApiResult};

use async_trait::async_trait;
use hub_protocol::{Conversation, Message};

/// The slice of the REST API the messaging core depends on.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// `GET /api/conversations`
    async fn list_conversations(&self) -> ApiResult<Vec<Conversation>>;

    /// `GET /api/conversations/{id}/messages`, ascending by creation order.
    async fn list_messages(&self, conversation_id: &str) -> ApiResult<Vec<Message>>;

    /// `POST /api/conversations`. Returns the new conversation id.
    async fn start_conversation(&self, listing_ref: &str, landlord_id: &str)
    -> ApiResult<String>;
}
