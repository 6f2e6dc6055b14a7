//! Conversation view controller.
//!
//! Owns the selection, its channel and its transcript. Everything
//! asynchronous (history responses, channel events) comes back through one
//! inbox and is applied by [`ConversationController::next_update`], so the
//! controller itself never needs a lock.

mod controller;
mod transcript;

pub use controller::{
    ChatError, ControllerConfig, ConversationController, HistoryState, SendOutcome, ViewUpdate,
    contact_landlord,
};
pub use transcript::{LiveOutcome, PendingMessage, PendingStatus, Transcript, TranscriptEntry};
