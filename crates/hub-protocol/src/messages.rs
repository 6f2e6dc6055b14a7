//! Persisted chat messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message the server has stored. Returned by the history endpoint and
/// pushed over the socket as the payload of `newMessage`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "_id", deserialize_with = "crate::id::deserialize")]
    pub id: String,
    #[serde(deserialize_with = "crate::id::deserialize")]
    pub conversation_id: String,
    #[serde(deserialize_with = "crate::id::deserialize")]
    pub sender_id: String,
    pub content: String,
    /// Ordering key assigned by the server.
    #[serde(
        rename = "createdAt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
    /// Echo of the sender's idempotency token, when the server supports it.
    #[serde(
        rename = "clientToken",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub client_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_from_history_document() {
        let message: Message = serde_json::from_value(json!({
            "_id": "m1",
            "conversation_id": "c1",
            "sender_id": "s1",
            "content": "Is the flat still available?",
            "createdAt": "2024-02-01T10:00:00.000Z",
            "__v": 0
        }))
        .unwrap();

        assert_eq!(message.id, "m1");
        assert_eq!(message.sender_id, "s1");
        assert!(message.created_at.is_some());
        assert!(message.client_token.is_none());
    }

    #[test]
    fn test_message_without_timestamp() {
        let message: Message = serde_json::from_value(json!({
            "_id": 1700000000000_i64,
            "conversation_id": "c1",
            "sender_id": "s1",
            "content": "hi"
        }))
        .unwrap();
        assert_eq!(message.id, "1700000000000");
        assert!(message.created_at.is_none());
    }
}
