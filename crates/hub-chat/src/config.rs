//! Configuration sections consumed by the library.
//!
//! The binary nests these inside its top-level config file; see `main.rs`
//! for loading and layering.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Where the backend lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL for REST calls.
    pub api_url: String,
    /// Socket endpoint. Derived from `api_url` when unset.
    pub ws_url: Option<String>,
    /// Per-request timeout for REST calls.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:3001".to_string(),
            ws_url: None,
            request_timeout_secs: 30,
        }
    }
}

impl ServerConfig {
    /// The socket URL: explicit `ws_url`, or `api_url` with the `http`
    /// scheme prefix swapped for `ws` (so `https` becomes `wss`).
    pub fn websocket_url(&self) -> String {
        if let Some(ref url) = self.ws_url {
            return url.clone();
        }
        match self.api_url.strip_prefix("http") {
            Some(rest) => format!("ws{}", rest),
            None => self.api_url.clone(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// How the channel decides authentication succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthAck {
    /// Ready as soon as the auth frame is written. The server is trusted to
    /// accept it; a rejection looks like a silent drop.
    #[default]
    Implicit,
    /// Stay in `Authenticating` until the server sends `authOk`.
    Required,
}

/// Message channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Upper bound on connect + authenticate before the handle closes.
    pub handshake_timeout_ms: u64,
    pub auth_ack: AuthAck,
    /// Inbound events buffered before the reader applies backpressure.
    pub event_buffer: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: 10_000,
            auth_ack: AuthAck::Implicit,
            event_buffer: 64,
        }
    }
}

impl ChannelConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

/// What happens when the server echoes a message this client sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReconcilePolicy {
    /// The pending entry and the persisted echo both stay in the transcript.
    #[default]
    Preserve,
    /// Outbound messages carry a `clientToken`; an echo carrying the same
    /// token replaces the pending entry.
    ClientToken,
}

/// Conversation view settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub reconcile: ReconcilePolicy,
    /// With `client-token`, pending entries without an echo after this long
    /// are marked expired.
    pub pending_timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            reconcile: ReconcilePolicy::Preserve,
            pending_timeout_secs: 30,
        }
    }
}

impl ChatConfig {
    pub fn pending_timeout(&self) -> Duration {
        Duration::from_secs(self.pending_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_websocket_url_derivation() {
        let mut server = ServerConfig::default();
        assert_eq!(server.websocket_url(), "ws://localhost:3001");

        server.api_url = "https://housing-hub-backend.onrender.com/".to_string();
        assert_eq!(
            server.websocket_url(),
            "wss://housing-hub-backend.onrender.com/"
        );

        server.ws_url = Some("ws://chat.internal:9000".to_string());
        assert_eq!(server.websocket_url(), "ws://chat.internal:9000");
    }

    #[test]
    fn test_policy_names() {
        let policy: ReconcilePolicy = serde_json::from_str("\"client-token\"").unwrap();
        assert_eq!(policy, ReconcilePolicy::ClientToken);
        let ack: AuthAck = serde_json::from_str("\"required\"").unwrap();
        assert_eq!(ack, AuthAck::Required);
    }

    #[test]
    fn test_partial_channel_section_keeps_defaults() {
        let config: ChannelConfig = toml::from_str("auth_ack = \"required\"").unwrap();
        assert_eq!(config.auth_ack, AuthAck::Required);
        assert_eq!(config.handshake_timeout(), Duration::from_secs(10));
        assert_eq!(config.event_buffer, 64);
    }
}
