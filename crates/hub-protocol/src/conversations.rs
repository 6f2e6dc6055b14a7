//! Conversation documents as returned by `GET /api/conversations`.
//!
//! The backend populates the listing and both participants, so each entry
//! carries enough to label a selector without further requests.

use serde::{Deserialize, Serialize};

use crate::identity::Role;

/// Listing the conversation is about (`property_id` on the wire).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingSummary {
    #[serde(
        rename = "_id",
        default,
        deserialize_with = "crate::id::deserialize_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// One side of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    #[serde(
        rename = "_id",
        default,
        deserialize_with = "crate::id::deserialize_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    pub email: String,
}

/// A durable thread between one student and one landlord about one listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    #[serde(rename = "_id", deserialize_with = "crate::id::deserialize")]
    pub id: String,
    #[serde(rename = "property_id")]
    pub listing: ListingSummary,
    #[serde(rename = "student_id")]
    pub student: Participant,
    #[serde(rename = "landlord_id")]
    pub landlord: Participant,
}

impl Conversation {
    /// The participant on the other side from a viewer with `role`.
    pub fn counterparty(&self, role: Role) -> &Participant {
        match role {
            Role::Student => &self.landlord,
            Role::Landlord => &self.student,
        }
    }

    /// Identifier of the listing, when the backend populated it.
    pub fn listing_ref(&self) -> Option<&str> {
        self.listing.id.as_deref()
    }
}

/// Body of `POST /api/conversations`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartConversationRequest {
    pub property_id: String,
    pub landlord_id: String,
}

/// Response of `POST /api/conversations`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartConversationResponse {
    #[serde(deserialize_with = "crate::id::deserialize")]
    pub conversation_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> serde_json::Value {
        json!({
            "_id": "c1",
            "property_id": { "_id": "p1", "title": "Two-bed near campus", "price": 950 },
            "student_id": { "_id": "s1", "email": "sam@uni.edu" },
            "landlord_id": { "_id": "l1", "email": "lee@rent.com" },
            "createdAt": "2024-02-01T10:00:00.000Z"
        })
    }

    #[test]
    fn test_conversation_from_populated_document() {
        let convo: Conversation = serde_json::from_value(sample()).unwrap();
        assert_eq!(convo.id, "c1");
        assert_eq!(convo.listing.title, "Two-bed near campus");
        assert_eq!(convo.listing_ref(), Some("p1"));
        assert_eq!(convo.listing.price, Some(950.0));
    }

    #[test]
    fn test_counterparty_depends_on_viewer_role() {
        let convo: Conversation = serde_json::from_value(sample()).unwrap();
        assert_eq!(convo.counterparty(Role::Student).email, "lee@rent.com");
        assert_eq!(convo.counterparty(Role::Landlord).email, "sam@uni.edu");
    }

    #[test]
    fn test_start_conversation_wire_names() {
        let body = serde_json::to_value(StartConversationRequest {
            property_id: "p1".to_string(),
            landlord_id: "l1".to_string(),
        })
        .unwrap();
        assert_eq!(body, json!({ "property_id": "p1", "landlord_id": "l1" }));

        let response: StartConversationResponse =
            serde_json::from_value(json!({ "conversationId": "c9" })).unwrap();
        assert_eq!(response.conversation_id, "c9");
    }
}
