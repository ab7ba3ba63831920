//! Conversation reducer
//!
//! Folds typed stream events into a message record. The reducer is a pure
//! function of `(record, event, context)`; callers own the record and
//! republish whatever snapshot it returns.
//!
//! ```text
//! Streaming --content/function_call/function_result/thread_info/intermediate--> Streaming
//! Streaming --stream_complete--> Completed
//! Streaming --error-----------> Errored
//! ```
//!
//! Terminal states absorb every later event unchanged.

mod clock;

pub use clock::{Clock, ManualClock, SystemClock};

use crate::protocol::{parse_payload, FunctionCallRecord, MessageRecord, MessageStatus, StreamEvent};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Template applied to `error` events when none is configured
pub const DEFAULT_ERROR_TEMPLATE: &str = "Error: {error}";

/// Placeholder substituted with the error description
pub const ERROR_PLACEHOLDER: &str = "{error}";

/// Description used when an `error` event carries none
pub const UNKNOWN_ERROR: &str = "Unknown error";

/// Per-event inputs that are not part of the record itself
#[derive(Debug, Clone, Copy)]
pub struct EventContext<'a> {
    /// Time since the exchange started
    pub elapsed: Duration,

    /// When the event is being applied
    pub observed_at: DateTime<Utc>,

    /// Template used to render `error` events into content
    pub error_template: &'a str,
}

impl<'a> EventContext<'a> {
    /// Create a context using the default error template
    pub fn new(elapsed: Duration, observed_at: DateTime<Utc>) -> Self {
        Self {
            elapsed,
            observed_at,
            error_template: DEFAULT_ERROR_TEMPLATE,
        }
    }

    /// Use a different error template
    pub fn with_error_template(mut self, template: &'a str) -> Self {
        self.error_template = template;
        self
    }

    fn format_error(&self, error: &str) -> String {
        let error = if error.trim().is_empty() {
            UNKNOWN_ERROR
        } else {
            error
        };
        self.error_template.replace(ERROR_PLACEHOLDER, error)
    }
}

/// Why an event left the record untouched
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The record already reached a terminal state
    AfterTerminal,
    /// A `function_result` with no unresolved call of that name
    UnmatchedResult { function_name: String },
    /// The payload could not be parsed
    InvalidPayload { label: &'static str },
}

/// What applying an event did besides producing the next record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// The record changed
    Updated,
    /// The event was consumed without visible change
    Unchanged,
    /// A session token to hand to the collaborator; the record is unchanged
    SessionToken(String),
    /// The event was dropped
    Ignored(IgnoreReason),
}

/// Result of applying one event
#[derive(Debug, Clone)]
pub struct Transition {
    /// The next record
    pub record: MessageRecord,

    /// Side effect of the event
    pub effect: Effect,
}

impl Transition {
    fn updated(record: MessageRecord) -> Self {
        Self {
            record,
            effect: Effect::Updated,
        }
    }

    fn with_effect(record: MessageRecord, effect: Effect) -> Self {
        Self { record, effect }
    }
}

/// Apply one event to a record, producing the next record
pub fn reduce(mut record: MessageRecord, event: StreamEvent, ctx: &EventContext<'_>) -> Transition {
    if record.status.is_terminal() {
        tracing::debug!(
            message_id = %record.id,
            event = event.kind(),
            "Ignoring event after terminal state"
        );
        return Transition::with_effect(record, Effect::Ignored(IgnoreReason::AfterTerminal));
    }

    match event {
        StreamEvent::Content { content } => {
            record.content.push_str(&content);
            Transition::updated(record)
        }

        StreamEvent::FunctionCall {
            function_name,
            arguments,
        } => {
            let id = record.next_call_id();
            record.function_calls.push(FunctionCallRecord {
                id,
                name: function_name,
                arguments,
                result: None,
                observed_at: ctx.observed_at,
            });
            Transition::updated(record)
        }

        StreamEvent::FunctionResult {
            function_name,
            result,
        } => {
            // The protocol echoes no call id, so the earliest unresolved
            // call with the same name takes the result.
            let pending = record
                .function_calls
                .iter_mut()
                .find(|call| call.name == function_name && call.result.is_none());

            match pending {
                Some(call) => {
                    call.result = Some(result);
                    Transition::updated(record)
                }
                None => {
                    tracing::debug!(
                        message_id = %record.id,
                        function = %function_name,
                        "Dropping function result with no pending call"
                    );
                    Transition::with_effect(
                        record,
                        Effect::Ignored(IgnoreReason::UnmatchedResult { function_name }),
                    )
                }
            }
        }

        StreamEvent::ThreadInfo { thread_id } => {
            Transition::with_effect(record, Effect::SessionToken(thread_id))
        }

        StreamEvent::Intermediate { .. } => Transition::with_effect(record, Effect::Unchanged),

        StreamEvent::StreamComplete {} => {
            record.status = MessageStatus::Completed;
            record.response_time_ms = Some(round_millis(ctx.elapsed));
            Transition::updated(record)
        }

        event @ StreamEvent::Error { .. } => {
            let description = event.error_description().unwrap_or_default();
            record.content = ctx.format_error(&description);
            record.status = MessageStatus::Errored;
            Transition::updated(record)
        }
    }
}

/// Parse a payload string and apply it.
///
/// A payload that fails to parse is reported and skipped; the record comes
/// back unchanged.
pub fn reduce_payload(record: MessageRecord, payload: &str, ctx: &EventContext<'_>) -> Transition {
    match parse_payload(payload) {
        Ok(event) => reduce(record, event, ctx),
        Err(e) => {
            tracing::warn!(
                message_id = %record.id,
                kind = e.label(),
                "Skipping stream payload: {}",
                e
            );
            let label = e.label();
            Transition::with_effect(record, Effect::Ignored(IgnoreReason::InvalidPayload { label }))
        }
    }
}

/// Milliseconds rounded to the nearest whole number
fn round_millis(elapsed: Duration) -> u64 {
    (elapsed.as_secs_f64() * 1000.0).round() as u64
}
