//! Async read loop over a live response stream

use super::{Conversation, ExchangeHandle};
use crate::protocol::{MessageRecord, MessageStatus};
use futures::{Stream, StreamExt};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::Instrument;

/// A conversation shared between the collaborator and read loops
pub type SharedConversation = Arc<Mutex<Conversation>>;

/// How a read loop ended
#[derive(Debug, Clone, PartialEq)]
pub enum DriveOutcome {
    /// `stream_complete` was applied
    Completed(MessageRecord),
    /// An `error` event was applied, possibly synthesized from a transport fault
    Errored(MessageRecord),
    /// The stream closed without a terminal event
    Stalled(MessageRecord),
    /// The exchange was cancelled or superseded
    Cancelled,
}

impl DriveOutcome {
    /// The final record, unless the exchange was cancelled
    pub fn record(&self) -> Option<&MessageRecord> {
        match self {
            DriveOutcome::Completed(record)
            | DriveOutcome::Errored(record)
            | DriveOutcome::Stalled(record) => Some(record),
            DriveOutcome::Cancelled => None,
        }
    }
}

fn lock(conversation: &SharedConversation) -> MutexGuard<'_, Conversation> {
    conversation.lock().unwrap_or_else(|e| e.into_inner())
}

/// Consume a response stream for one exchange.
///
/// Chunks are fed in arrival order under the exchange's generation. The
/// loop stops as soon as the record reaches a terminal state, the stream
/// ends, or the exchange is cancelled; cancellation does not wait for the
/// next chunk. A transport error becomes a synthetic `error` event with the
/// configured generic description.
pub async fn drive<S, B, E>(
    conversation: &SharedConversation,
    handle: &ExchangeHandle,
    stream: S,
) -> DriveOutcome
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: fmt::Display,
{
    let span = tracing::info_span!(
        "exchange",
        generation = handle.generation(),
        message_id = %handle.message_id()
    );

    async move {
        tokio::pin!(stream);
        let cancelled = handle.cancellation().clone();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancelled.cancelled() => {
                    tracing::debug!("Stopping read loop for cancelled exchange");
                    return DriveOutcome::Cancelled;
                }
                next = stream.next() => next,
            };

            let (snapshot, ended) = match next {
                Some(Ok(chunk)) => (lock(conversation).feed(handle, chunk.as_ref()), false),
                Some(Err(e)) => {
                    tracing::warn!("Transport error while streaming: {}", e);
                    (lock(conversation).fail(handle, None), true)
                }
                None => (lock(conversation).finish(handle), true),
            };

            // A retired generation yields no snapshot
            let Some(record) = snapshot else {
                return DriveOutcome::Cancelled;
            };

            match record.status {
                MessageStatus::Completed => return DriveOutcome::Completed(record),
                MessageStatus::Errored => return DriveOutcome::Errored(record),
                MessageStatus::Streaming if ended => return DriveOutcome::Stalled(record),
                MessageStatus::Streaming => {}
            }
        }
    }
    .instrument(span)
    .await
}

/// Run [`drive`] on the tokio runtime
pub fn spawn<S, B, E>(
    conversation: SharedConversation,
    handle: ExchangeHandle,
    stream: S,
) -> JoinHandle<DriveOutcome>
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    tokio::spawn(async move { drive(&conversation, &handle, stream).await })
}
