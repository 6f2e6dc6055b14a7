//! Channel lifecycle types.

use thiserror::Error;

use super::transport::TransportError;

/// Lifecycle state of a channel handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Unbound,
    Connecting,
    Authenticating,
    Ready,
    Closed,
}

impl ChannelState {
    pub fn is_ready(self) -> bool {
        self == ChannelState::Ready
    }

    pub fn is_closed(self) -> bool {
        self == ChannelState::Closed
    }
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelState::Unbound => write!(f, "unbound"),
            ChannelState::Connecting => write!(f, "connecting"),
            ChannelState::Authenticating => write!(f, "authenticating"),
            ChannelState::Ready => write!(f, "ready"),
            ChannelState::Closed => write!(f, "closed"),
        }
    }
}

/// Association of a handle with its conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelBinding {
    pub conversation_id: String,
    pub authenticated: bool,
}

/// Why a channel reached `Closed`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CloseReason {
    #[error("closed by client")]
    ClosedByClient,

    #[error("session invalidated")]
    SessionInvalidated,

    #[error("not signed in")]
    Unauthenticated,

    #[error("handshake did not complete in time")]
    HandshakeTimeout,

    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    #[error("connection closed by server")]
    RemoteClosed,

    #[error(transparent)]
    Transport(#[from] TransportError),
}
