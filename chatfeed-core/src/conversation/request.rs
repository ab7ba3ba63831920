//! Outgoing request body

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Keys set by the request itself; context fields may not use them
pub const RESERVED_REQUEST_KEYS: &[&str] = &["message", "thread_id"];

/// What the collaborator sends to start an exchange.
///
/// Context fields are flattened next to `message` and `thread_id`:
///
/// ```json
/// {"message": "hi", "thread_id": "T1", "user_id": "u-7"}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRequest {
    /// Free-text query
    pub message: String,

    /// Session token from an earlier `thread_info` event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,

    /// Additional session/context fields
    #[serde(flatten)]
    pub context: BTreeMap<String, Value>,
}

impl ExchangeRequest {
    /// Create a request for a query
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    /// Continue an existing session
    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    /// Add a context field
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Fill in what the caller left out: the held session token and
    /// configured default context. Explicit values always win.
    pub(crate) fn resolve(
        mut self,
        held_token: Option<&str>,
        defaults: &BTreeMap<String, Value>,
    ) -> Self {
        if self.thread_id.is_none() {
            self.thread_id = held_token.map(str::to_string);
        }

        for (key, value) in defaults {
            self.context
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }

        self.context.retain(|key, _| {
            let reserved = RESERVED_REQUEST_KEYS.contains(&key.as_str());
            if reserved {
                tracing::warn!(key = %key, "Dropping context field that shadows a request field");
            }
            !reserved
        });

        self
    }
}
