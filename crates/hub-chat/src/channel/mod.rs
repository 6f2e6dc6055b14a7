//! Per-conversation message channel.
//!
//! A [`MessageChannel`] owns one socket bound to exactly one conversation.
//! Opening it spawns an actor task that connects, authenticates and then
//! pumps frames in both directions until the handle is closed, the session
//! is invalidated or the transport fails.
//!
//! ```text
//!           open()                 transport ready          auth frame written
//! Unbound ──────────► Connecting ─────────────────► Authenticating ─────────────► Ready
//!    │                    │                               │                        │
//!    └────────────────────┴───────────────┬───────────────┴────────────────────────┘
//!                                         ▼
//!                    close() / transport error / timeout / logout
//!                                       Closed
//! ```
//!
//! Handles are disposable: `Closed` is terminal and a new conversation gets a
//! new channel.

mod channel;
mod state;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use channel::{ChannelEvent, ChannelEvents, MessageChannel, SendError};
pub use state::{ChannelBinding, ChannelState, CloseReason};
pub use transport::{Connector, Transport, TransportError, WireFrame, WsConnector};
