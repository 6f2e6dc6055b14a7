//! Identity claims and the login exchange.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Account type chosen at signup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Landlord,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Student => write!(f, "student"),
            Role::Landlord => write!(f, "landlord"),
        }
    }
}

/// The signed-in user. Immutable for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub email: String,
    pub role: Role,
}

/// Body of `POST /api/login`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Successful response of `POST /api/login`.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub email: String,
    #[serde(deserialize_with = "crate::id::deserialize")]
    pub user_id: String,
    pub user_type: Role,
}

impl LoginResponse {
    /// Split into the bearer token and the identity it authenticates.
    pub fn into_parts(self) -> (String, Identity) {
        (
            self.token,
            Identity {
                id: self.user_id,
                email: self.email,
                role: self.user_type,
            },
        )
    }
}

impl fmt::Debug for LoginResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginResponse")
            .field("token", &"<redacted>")
            .field("email", &self.email)
            .field("user_id", &self.user_id)
            .field("user_type", &self.user_type)
            .finish()
    }
}
