//! Protocol module for streamed chat responses
//!
//! This module defines the events carried on the wire and the message
//! records they are folded into. These structures are designed to be:
//! - Independent of the transport that delivered them
//! - Serializable for handing snapshots to a rendering layer
//! - Strict about unknown or malformed payloads without ever failing a stream

pub mod error;
pub mod events;
pub mod types;

pub use error::{PayloadError, PayloadResult};
pub use events::{parse_payload, StreamEvent, KNOWN_EVENT_TYPES};
pub use types::{FunctionCallRecord, MessageRecord, MessageRole, MessageStatus};
