//! Conversation state types
//!
//! These structures describe the message records built up while a response
//! streams in. The design prioritizes:
//! - Append-only growth of the assistant content
//! - Stable, unique identifiers for messages and function calls
//! - Cheap snapshots that can be handed to a rendering layer at any time

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Role of a message in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Query typed by the user
    User,
    /// Response streamed back by the service
    Assistant,
}

/// Lifecycle of a message record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Events are still being applied
    Streaming,
    /// A `stream_complete` event was applied
    Completed,
    /// An `error` event was applied
    Errored,
}

impl MessageStatus {
    /// Whether no further events may change the record
    pub fn is_terminal(&self) -> bool {
        !matches!(self, MessageStatus::Streaming)
    }
}

/// One tool invocation surfaced mid-stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallRecord {
    /// Identifier unique within the owning message
    pub id: String,

    /// Name of the invoked function, as reported by the stream
    pub name: String,

    /// Arguments exactly as received
    pub arguments: Map<String, Value>,

    /// Result, once a matching `function_result` arrived
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// When the originating `function_call` event was applied
    pub observed_at: DateTime<Utc>,
}

impl FunctionCallRecord {
    /// Whether a result has been attached
    pub fn is_resolved(&self) -> bool {
        self.result.is_some()
    }
}

/// A message in the conversation, built incrementally for assistant replies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Unique per exchange, never reused
    pub id: Uuid,

    /// Role of the message sender
    pub role: MessageRole,

    /// Accumulated text
    pub content: String,

    /// Function calls in arrival order
    #[serde(default)]
    pub function_calls: Vec<FunctionCallRecord>,

    /// Lifecycle state
    pub status: MessageStatus,

    /// Elapsed time from exchange start to `stream_complete`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl MessageRecord {
    /// Create an empty assistant record in the streaming state
    pub fn assistant(created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: MessageRole::Assistant,
            content: String::new(),
            function_calls: Vec::new(),
            status: MessageStatus::Streaming,
            response_time_ms: None,
            created_at,
        }
    }

    /// Create a finished user record holding the query text
    pub fn user(content: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: MessageRole::User,
            content: content.into(),
            function_calls: Vec::new(),
            status: MessageStatus::Completed,
            response_time_ms: None,
            created_at,
        }
    }

    /// Whether events are still being applied to this record
    pub fn streaming(&self) -> bool {
        self.status == MessageStatus::Streaming
    }

    /// Id for the next function call appended to this message.
    ///
    /// The suffix is the call's position in `function_calls`. Calls are never
    /// removed, so ids stay unique within the message even after the record
    /// is serialized and restored.
    pub(crate) fn next_call_id(&self) -> String {
        format!("call_{}_{}", self.id.simple(), self.function_calls.len() + 1)
    }

    /// Find a function call by id
    pub fn function_call(&self, id: &str) -> Option<&FunctionCallRecord> {
        self.function_calls.iter().find(|call| call.id == id)
    }

    /// Function calls that have not received a result yet
    pub fn pending_calls(&self) -> impl Iterator<Item = &FunctionCallRecord> {
        self.function_calls.iter().filter(|call| !call.is_resolved())
    }
}
