//! Chatfeed Core Library
//!
//! This crate turns the line-oriented event stream of a chat service into
//! conversational state: a frame decoder reassembles `data:` payloads from
//! arbitrary chunks, and a reducer folds the typed events into one evolving
//! message record per exchange.

pub mod config;
pub mod conversation;
pub mod decoder;
pub mod protocol;
pub mod reducer;

pub use config::ChatFeedConfig;
pub use conversation::{
    Conversation, ConversationUpdate, DriveOutcome, ExchangeHandle, ExchangeRequest,
    SharedConversation,
};
pub use decoder::Decoder;
pub use protocol::{FunctionCallRecord, MessageRecord, MessageRole, MessageStatus, StreamEvent};

/// Returns the version of the Chatfeed Core library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
