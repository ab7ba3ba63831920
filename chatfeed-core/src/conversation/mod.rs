//! Conversation session: exchanges, generations, and the session token
//!
//! A [`Conversation`] owns at most one live exchange. Each exchange is
//! tagged with a generation number when it begins; input arriving with a
//! handle whose generation is no longer live is dropped, so a stream that
//! was abandoned can never touch a newer record.
//!
//! ```text
//! begin_exchange ──► ExchangeHandle { generation }
//!        │
//!   feed(handle, chunk) ──► Decoder ──► payloads ──► reduce ──► snapshot
//!        │
//!   cancel(handle) / begin_exchange ──► generation retired
//! ```

mod request;
pub mod stream;

pub use request::{ExchangeRequest, RESERVED_REQUEST_KEYS};
pub use stream::{drive, spawn, DriveOutcome, SharedConversation};

use crate::config::ChatFeedConfig;
use crate::decoder::Decoder;
use crate::protocol::{MessageRecord, MessageStatus, StreamEvent};
use crate::reducer::{self, Clock, Effect, EventContext, SystemClock, Transition};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Identifies one exchange and the generation it belongs to
#[derive(Debug, Clone)]
pub struct ExchangeHandle {
    generation: u64,
    message_id: Uuid,
    request: ExchangeRequest,
    cancel: CancellationToken,
}

impl ExchangeHandle {
    /// Generation this exchange was tagged with
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Id of the assistant record being built
    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    /// The request body to send, with session token and defaults filled in
    pub fn request(&self) -> &ExchangeRequest {
        &self.request
    }

    /// Token tripped when the exchange is cancelled or superseded
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the exchange was cancelled or superseded
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Notifications published to subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum ConversationUpdate {
    /// The live record changed
    Snapshot {
        generation: u64,
        record: MessageRecord,
    },
    /// A `thread_info` event delivered a session token
    SessionToken { generation: u64, token: String },
    /// The conversation was reset for a new chat
    Reset,
}

/// State of the exchange currently accepting input
#[derive(Debug)]
struct LiveExchange {
    generation: u64,
    started_at: Instant,
    decoder: Decoder,
    record: Option<MessageRecord>,
    cancel: CancellationToken,
}

/// What applying a batch of events did
#[derive(Debug, Default)]
struct Applied {
    changed: bool,
    tokens: Vec<String>,
}

impl LiveExchange {
    fn record(&self) -> Option<&MessageRecord> {
        self.record.as_ref()
    }

    fn apply(&mut self, event: StreamEvent, clock: &dyn Clock, template: &str, applied: &mut Applied) {
        self.step(applied, clock, template, |record, ctx| {
            reducer::reduce(record, event, ctx)
        });
    }

    fn apply_payload(&mut self, payload: &str, clock: &dyn Clock, template: &str, applied: &mut Applied) {
        self.step(applied, clock, template, |record, ctx| {
            reducer::reduce_payload(record, payload, ctx)
        });
    }

    fn step<F>(&mut self, applied: &mut Applied, clock: &dyn Clock, template: &str, f: F)
    where
        F: FnOnce(MessageRecord, &EventContext<'_>) -> Transition,
    {
        let Some(record) = self.record.take() else {
            return;
        };

        let ctx = EventContext::new(clock.now().saturating_duration_since(self.started_at), clock.wall())
            .with_error_template(template);
        let was_streaming = record.streaming();

        let transition = f(record, &ctx);
        match transition.effect {
            Effect::Updated => applied.changed = true,
            Effect::SessionToken(token) => applied.tokens.push(token),
            Effect::Unchanged | Effect::Ignored(_) => {}
        }

        let record = transition.record;
        if was_streaming && !record.streaming() {
            match record.status {
                MessageStatus::Completed => tracing::info!(
                    generation = self.generation,
                    message_id = %record.id,
                    response_time_ms = record.response_time_ms,
                    "Exchange completed"
                ),
                MessageStatus::Errored => tracing::info!(
                    generation = self.generation,
                    message_id = %record.id,
                    "Exchange ended with an error"
                ),
                MessageStatus::Streaming => {}
            }
        }
        self.record = Some(record);
    }
}

/// One conversation with a remote chat service
#[derive(Debug)]
pub struct Conversation {
    config: ChatFeedConfig,
    clock: Arc<dyn Clock>,
    last_generation: u64,
    live: Option<LiveExchange>,
    session_token: Option<String>,
    transcript: Vec<MessageRecord>,
    updates: broadcast::Sender<ConversationUpdate>,
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new(ChatFeedConfig::default())
    }
}

impl Conversation {
    /// Create a conversation using the system clock
    pub fn new(config: ChatFeedConfig) -> Self {
        let (updates, _) = broadcast::channel(config.updates.channel_capacity.max(1));
        Self {
            config,
            clock: Arc::new(SystemClock),
            last_generation: 0,
            live: None,
            session_token: None,
            transcript: Vec::new(),
            updates,
        }
    }

    /// Use a different time source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Wrap the conversation for use from async read loops
    pub fn into_shared(self) -> SharedConversation {
        Arc::new(std::sync::Mutex::new(self))
    }

    /// The active configuration
    pub fn config(&self) -> &ChatFeedConfig {
        &self.config
    }

    /// Subscribe to snapshots and session tokens
    pub fn subscribe(&self) -> broadcast::Receiver<ConversationUpdate> {
        self.updates.subscribe()
    }

    /// Session token to echo on the next request
    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }

    /// Restore a session token persisted by the collaborator
    pub fn set_session_token(&mut self, token: Option<String>) {
        self.session_token = token;
    }

    /// Start a new exchange.
    ///
    /// Any exchange still live is cancelled first; its generation is retired
    /// so late input for it is ignored.
    pub fn begin_exchange(&mut self, request: ExchangeRequest) -> ExchangeHandle {
        self.retire_live("superseded");

        let request = request.resolve(
            self.session_token.as_deref(),
            &self.config.request.default_context,
        );

        self.last_generation += 1;
        let generation = self.last_generation;
        let now = self.clock.wall();

        self.transcript
            .push(MessageRecord::user(request.message.clone(), now));

        let record = MessageRecord::assistant(now);
        let message_id = record.id;
        let cancel = CancellationToken::new();

        tracing::info!(
            generation,
            message_id = %message_id,
            resumed_session = request.thread_id.is_some(),
            "Exchange started"
        );

        self.live = Some(LiveExchange {
            generation,
            started_at: self.clock.now(),
            decoder: Decoder::new(),
            record: Some(record.clone()),
            cancel: cancel.clone(),
        });
        self.publish(ConversationUpdate::Snapshot { generation, record });

        ExchangeHandle {
            generation,
            message_id,
            request,
            cancel,
        }
    }

    /// Push a raw chunk of the response stream.
    ///
    /// Returns the updated snapshot, or `None` if the handle's generation is
    /// no longer live.
    pub fn feed(&mut self, handle: &ExchangeHandle, chunk: &[u8]) -> Option<MessageRecord> {
        self.feed_with(handle, |decoder| decoder.push_bytes(chunk))
    }

    /// Push an already-decoded text chunk
    pub fn feed_str(&mut self, handle: &ExchangeHandle, chunk: &str) -> Option<MessageRecord> {
        self.feed_with(handle, |decoder| decoder.push_str(chunk))
    }

    /// Apply an event directly, bypassing the decoder
    pub fn apply_event(&mut self, handle: &ExchangeHandle, event: StreamEvent) -> Option<MessageRecord> {
        let live = Self::live_for(&mut self.live, handle)?;
        let mut applied = Applied::default();
        live.apply(
            event,
            self.clock.as_ref(),
            &self.config.messages.error_template,
            &mut applied,
        );
        let snapshot = live.record().cloned();
        self.settle(handle.generation, applied, snapshot)
    }

    /// The transport closed.
    ///
    /// Any unterminated trailing line is discarded. A record that saw no
    /// terminal event stays streaming; the caller decides how to present a
    /// stalled exchange.
    pub fn finish(&mut self, handle: &ExchangeHandle) -> Option<MessageRecord> {
        let live = Self::live_for(&mut self.live, handle)?;
        live.decoder.finish();

        let snapshot = live.record().cloned();
        if let Some(record) = snapshot.as_ref().filter(|r| r.streaming()) {
            tracing::warn!(
                generation = handle.generation,
                message_id = %record.id,
                "Stream ended without a terminal event"
            );
        }
        snapshot
    }

    /// The transport failed before a terminal event arrived.
    ///
    /// Applies a synthetic `error` event carrying `detail`, or the
    /// configured generic description when there is none.
    pub fn fail(&mut self, handle: &ExchangeHandle, detail: Option<&str>) -> Option<MessageRecord> {
        let description = detail
            .map(str::to_string)
            .unwrap_or_else(|| self.config.messages.transport_error.clone());
        self.apply_event(handle, StreamEvent::error(description))
    }

    /// Cancel an exchange. Later input tagged with its generation is ignored.
    pub fn cancel(&mut self, handle: &ExchangeHandle) {
        handle.cancel.cancel();
        if self.is_live(handle) {
            self.retire_live("cancelled");
        }
    }

    /// Start over for a new chat: cancel the live exchange and forget the
    /// session token and transcript.
    pub fn reset(&mut self) {
        self.retire_live("reset");
        self.transcript.clear();
        self.session_token = None;
        self.publish(ConversationUpdate::Reset);
    }

    /// Whether the handle's generation is the live one
    pub fn is_live(&self, handle: &ExchangeHandle) -> bool {
        self.live
            .as_ref()
            .is_some_and(|live| live.generation == handle.generation)
    }

    /// Current snapshot of the live record
    pub fn live_record(&self) -> Option<&MessageRecord> {
        self.live.as_ref().and_then(LiveExchange::record)
    }

    /// All messages of the conversation, oldest first, including the live record
    pub fn messages(&self) -> Vec<MessageRecord> {
        self.transcript
            .iter()
            .chain(self.live_record())
            .cloned()
            .collect()
    }

    fn feed_with<F>(&mut self, handle: &ExchangeHandle, push: F) -> Option<MessageRecord>
    where
        F: FnOnce(&mut Decoder) -> Vec<String>,
    {
        let live = Self::live_for(&mut self.live, handle)?;
        let payloads = push(&mut live.decoder);

        let mut applied = Applied::default();
        for payload in &payloads {
            live.apply_payload(
                payload,
                self.clock.as_ref(),
                &self.config.messages.error_template,
                &mut applied,
            );
        }

        let snapshot = live.record().cloned();
        self.settle(handle.generation, applied, snapshot)
    }

    fn settle(
        &mut self,
        generation: u64,
        applied: Applied,
        snapshot: Option<MessageRecord>,
    ) -> Option<MessageRecord> {
        for token in applied.tokens {
            self.session_token = Some(token.clone());
            self.publish(ConversationUpdate::SessionToken { generation, token });
        }

        if applied.changed {
            if let Some(record) = &snapshot {
                self.publish(ConversationUpdate::Snapshot {
                    generation,
                    record: record.clone(),
                });
            }
        }

        snapshot
    }

    fn live_for<'a>(
        live: &'a mut Option<LiveExchange>,
        handle: &ExchangeHandle,
    ) -> Option<&'a mut LiveExchange> {
        match live {
            Some(live) if live.generation == handle.generation => Some(live),
            _ => {
                tracing::debug!(
                    generation = handle.generation,
                    "Dropping input for a retired exchange"
                );
                None
            }
        }
    }

    fn retire_live(&mut self, reason: &'static str) {
        let Some(mut live) = self.live.take() else {
            return;
        };

        live.cancel.cancel();
        if let Some(record) = live.record.take() {
            if record.streaming() {
                tracing::info!(
                    generation = live.generation,
                    message_id = %record.id,
                    reason,
                    "Exchange abandoned while streaming"
                );
            }
            self.transcript.push(record);
        }
    }

    fn publish(&self, update: ConversationUpdate) {
        // No subscribers is fine
        let _ = self.updates.send(update);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reducer::ManualClock;
    use std::time::Duration;

    fn conversation() -> (Conversation, ManualClock) {
        let clock = ManualClock::new();
        let conversation = Conversation::default().with_clock(Arc::new(clock.clone()));
        (conversation, clock)
    }

    #[test]
    fn test_begin_creates_user_and_assistant_records() {
        let (mut conversation, _) = conversation();
        let handle = conversation.begin_exchange(ExchangeRequest::new("hi"));

        let messages = conversation.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "hi");
        assert_eq!(messages[1].id, handle.message_id());
        assert!(messages[1].streaming());
    }

    #[test]
    fn test_generations_increase() {
        let (mut conversation, _) = conversation();
        let first = conversation.begin_exchange(ExchangeRequest::new("one"));
        let second = conversation.begin_exchange(ExchangeRequest::new("two"));
        assert!(second.generation() > first.generation());
        assert_ne!(first.message_id(), second.message_id());
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
    }

    #[test]
    fn test_feed_applies_complete_lines() {
        let (mut conversation, clock) = conversation();
        let handle = conversation.begin_exchange(ExchangeRequest::new("hi"));

        let record = conversation
            .feed(&handle, b"data: {\"type\":\"content\",\"content\":\"Hel")
            .unwrap();
        assert_eq!(record.content, "");

        let record = conversation
            .feed(&handle, b"lo\"}\ndata: {\"type\":\"stream_complete\"}\n")
            .unwrap();
        assert_eq!(record.content, "Hello");
        assert!(!record.streaming());

        clock.advance(Duration::from_millis(5));
        assert!(conversation
            .feed(&handle, b"data: {\"type\":\"content\",\"content\":\"!\"}\n")
            .is_some_and(|r| r.content == "Hello"));
    }

    #[test]
    fn test_session_token_is_held_and_echoed() {
        let (mut conversation, _) = conversation();
        let handle = conversation.begin_exchange(ExchangeRequest::new("hi"));
        conversation.feed_str(&handle, "data: {\"type\":\"thread_info\",\"thread_id\":\"T9\"}\n");
        assert_eq!(conversation.session_token(), Some("T9"));

        let next = conversation.begin_exchange(ExchangeRequest::new("again"));
        assert_eq!(next.request().thread_id.as_deref(), Some("T9"));
    }

    #[test]
    fn test_fail_uses_generic_message() {
        let (mut conversation, _) = conversation();
        let handle = conversation.begin_exchange(ExchangeRequest::new("hi"));
        let record = conversation.fail(&handle, None).unwrap();
        assert_eq!(record.status, MessageStatus::Errored);
        assert_eq!(
            record.content,
            format!("Error: {}", conversation.config().messages.transport_error)
        );
    }

    #[test]
    fn test_finish_leaves_unterminated_record_streaming() {
        let (mut conversation, _) = conversation();
        let handle = conversation.begin_exchange(ExchangeRequest::new("hi"));
        conversation.feed_str(&handle, "data: {\"type\":\"content\",\"content\":\"par\"}\ndata: {\"ty");
        let record = conversation.finish(&handle).unwrap();
        assert!(record.streaming());
        assert_eq!(record.content, "par");
    }

    #[test]
    fn test_reset_clears_everything() {
        let (mut conversation, _) = conversation();
        let handle = conversation.begin_exchange(ExchangeRequest::new("hi"));
        conversation.feed_str(&handle, "data: {\"type\":\"thread_info\",\"thread_id\":\"T1\"}\n");

        conversation.reset();

        assert!(conversation.messages().is_empty());
        assert!(conversation.session_token().is_none());
        assert!(handle.is_cancelled());
        assert!(conversation.feed_str(&handle, "data: {}\n").is_none());
    }
}
