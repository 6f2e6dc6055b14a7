//! Socket frames.
//!
//! One physical connection carries one conversation. The client must send
//! [`ClientFrame::Auth`] before anything else; the server pushes
//! [`ServerFrame::NewMessage`] for every stored message in that conversation.

use serde::{Deserialize, Serialize};

use crate::messages::Message;

// ============================================================================
// Client -> Server
// ============================================================================

/// Frames sent by the client.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    /// Binds the connection to a conversation. Must be the first frame.
    #[serde(rename = "auth")]
    Auth {
        token: String,
        #[serde(rename = "conversationId")]
        conversation_id: String,
    },

    /// Posts a message into the bound conversation.
    #[serde(rename = "message")]
    Message { payload: OutgoingMessage },
}

impl ClientFrame {
    pub fn auth(token: impl Into<String>, conversation_id: impl Into<String>) -> Self {
        ClientFrame::Auth {
            token: token.into(),
            conversation_id: conversation_id.into(),
        }
    }

    pub fn message(payload: OutgoingMessage) -> Self {
        ClientFrame::Message { payload }
    }

    /// Serialize to the JSON text sent on the wire.
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl std::fmt::Debug for ClientFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientFrame::Auth {
                conversation_id, ..
            } => f
                .debug_struct("Auth")
                .field("token", &"<redacted>")
                .field("conversation_id", conversation_id)
                .finish(),
            ClientFrame::Message { payload } => {
                f.debug_struct("Message").field("payload", payload).finish()
            }
        }
    }
}

/// Payload of an outbound `message` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub conversation_id: String,
    pub content: String,
    #[serde(
        rename = "clientToken",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub client_token: Option<String>,
}

// ============================================================================
// Server -> Client
// ============================================================================

/// Frames pushed by the server.
///
/// Only `newMessage` is part of the base protocol. The auth acknowledgement
/// frames are honoured when the client is configured to require them.
/// Anything else decodes to [`ServerFrame::Unknown`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    #[serde(rename = "newMessage")]
    NewMessage { payload: Message },

    #[serde(rename = "authOk")]
    AuthOk,

    #[serde(rename = "authError")]
    AuthError {
        #[serde(default)]
        message: Option<String>,
    },

    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        message: Option<String>,
    },

    #[serde(other)]
    Unknown,
}

impl ServerFrame {
    /// Parse a text frame.
    pub fn decode(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[test]
    fn test_auth_frame_wire_shape() {
        let text = ClientFrame::auth("tok", "c1").encode().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            json!({ "type": "auth", "token": "tok", "conversationId": "c1" })
        );
    }

    #[test]
    fn test_message_frame_wire_shape() {
        let frame = ClientFrame::message(OutgoingMessage {
            conversation_id: "c1".to_string(),
            content: "hello".to_string(),
            client_token: None,
        });
        let value: Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "message",
                "payload": { "conversation_id": "c1", "content": "hello" }
            })
        );
    }

    #[test]
    fn test_message_frame_carries_client_token() {
        let frame = ClientFrame::message(OutgoingMessage {
            conversation_id: "c1".to_string(),
            content: "hello".to_string(),
            client_token: Some("tok-1".to_string()),
        });
        let value: Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();
        assert_eq!(value["payload"]["clientToken"], "tok-1");
    }

    #[test]
    fn test_decode_new_message() {
        let text = json!({
            "type": "newMessage",
            "payload": {
                "_id": "m3",
                "conversation_id": "c1",
                "sender_id": "l1",
                "content": "Yes, it is.",
                "createdAt": "2024-02-01T10:05:00.000Z"
            }
        })
        .to_string();

        match ServerFrame::decode(&text).unwrap() {
            ServerFrame::NewMessage { payload } => {
                assert_eq!(payload.id, "m3");
                assert_eq!(payload.content, "Yes, it is.");
            }
            other => panic!("Expected newMessage, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_frame_type_is_tolerated() {
        let text = json!({ "type": "typing", "payload": { "userId": "l1" } }).to_string();
        assert_eq!(ServerFrame::decode(&text).unwrap(), ServerFrame::Unknown);
    }

    #[test]
    fn test_auth_error_without_message() {
        let frame = ServerFrame::decode(r#"{"type":"authError"}"#).unwrap();
        assert_eq!(frame, ServerFrame::AuthError { message: None });
    }

    #[test]
    fn test_debug_redacts_auth_token() {
        let printed = format!("{:?}", ClientFrame::auth("secret", "c1"));
        assert!(!printed.contains("secret"));
        assert!(printed.contains("c1"));
    }
}
