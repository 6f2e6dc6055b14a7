//! Housing Hub Chat Library
//!
//! This library provides the real-time conversation messaging core used by
//! the `hubchat` client: session context, REST client, conversation
//! directory, per-conversation message channel and the view controller that
//! ties them together.

pub mod api;
pub mod channel;
pub mod config;
pub mod controller;
pub mod directory;
pub mod session;

pub use hub_protocol as protocol;
