//! Typed stream events
//!
//! Every `data:` line of the response stream carries one JSON object whose
//! `type` field selects one of the variants below.

use super::error::{PayloadError, PayloadResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Event types understood by the reducer
pub const KNOWN_EVENT_TYPES: &[&str] = &[
    "content",
    "function_call",
    "function_result",
    "thread_info",
    "intermediate",
    "stream_complete",
    "error",
];

/// A single structured event from the response stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Text fragment to append
    Content { content: String },

    /// A function invocation started by the service
    FunctionCall {
        function_name: String,
        #[serde(default)]
        arguments: Map<String, Value>,
    },

    /// The outcome of an earlier function invocation
    FunctionResult {
        function_name: String,
        #[serde(default)]
        result: Value,
    },

    /// Session token to echo on the next request
    ThreadInfo { thread_id: String },

    /// Progress notice with no visible effect
    Intermediate {
        #[serde(flatten)]
        data: Map<String, Value>,
    },

    /// The response finished successfully
    StreamComplete {},

    /// The service reported a failure. The description is usually a string
    /// but any JSON value is accepted so the exchange still terminates.
    Error {
        #[serde(default)]
        error: Value,
    },
}

impl StreamEvent {
    /// Convenience constructor for text fragments
    pub fn content(text: impl Into<String>) -> Self {
        StreamEvent::Content {
            content: text.into(),
        }
    }

    /// Convenience constructor for error events
    pub fn error(message: impl Into<String>) -> Self {
        StreamEvent::Error {
            error: Value::String(message.into()),
        }
    }

    /// Text of an `error` event's description, if this is one.
    ///
    /// Non-string descriptions render as compact JSON; a missing or null
    /// description is empty.
    pub fn error_description(&self) -> Option<String> {
        match self {
            StreamEvent::Error { error } => Some(describe_error(error)),
            _ => None,
        }
    }

    /// The wire discriminator of this event
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Content { .. } => "content",
            StreamEvent::FunctionCall { .. } => "function_call",
            StreamEvent::FunctionResult { .. } => "function_result",
            StreamEvent::ThreadInfo { .. } => "thread_info",
            StreamEvent::Intermediate { .. } => "intermediate",
            StreamEvent::StreamComplete {} => "stream_complete",
            StreamEvent::Error { .. } => "error",
        }
    }

    /// Whether applying this event ends the exchange
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamEvent::StreamComplete {} | StreamEvent::Error { .. }
        )
    }
}

fn describe_error(error: &Value) -> String {
    match error {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Parse one payload string into an event.
///
/// The discriminator is inspected before the full deserialization so that
/// unknown types and malformed fields are reported separately.
pub fn parse_payload(payload: &str) -> PayloadResult<StreamEvent> {
    let value: Value = serde_json::from_str(payload).map_err(PayloadError::Malformed)?;

    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(PayloadError::MissingType)?
        .to_string();

    if !KNOWN_EVENT_TYPES.contains(&kind.as_str()) {
        return Err(PayloadError::UnknownType(kind));
    }

    serde_json::from_value(value).map_err(|source| PayloadError::InvalidShape { kind, source })
}
