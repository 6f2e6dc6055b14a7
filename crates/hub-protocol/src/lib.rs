//! Wire types for Housing Hub messaging.
//!
//! This crate defines the JSON shapes exchanged with the Housing Hub backend
//! across both of its boundaries:
//!
//! ```text
//! Client <--[REST: /api/login, /api/conversations, ...]--> Backend
//! Client <--[WS: auth / message frames, newMessage events]--> Backend
//! ```
//!
//! The backend stores documents with `_id` keys and mixes snake_case and
//! camelCase field names. The types here keep idiomatic Rust field names and
//! pin the exact wire names with serde attributes.

pub mod conversations;
pub mod frames;
pub mod identity;
pub mod messages;

mod id;

pub use conversations::{
    Conversation, ListingSummary, Participant, StartConversationRequest,
    StartConversationResponse,
};
pub use frames::{ClientFrame, OutgoingMessage, ServerFrame};
pub use identity::{Identity, LoginRequest, LoginResponse, Role};
pub use messages::Message;

/// Error body returned by the backend on non-2xx responses.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: Option<String>,
}
