//! Tests for the async read loop

use chatfeed_core::conversation::{self, DriveOutcome};
use chatfeed_core::reducer::ManualClock;
use chatfeed_core::{Conversation, ConversationUpdate, ExchangeRequest, MessageStatus};
use futures::channel::mpsc;
use futures::stream;
use std::sync::Arc;
use std::time::Duration;

type Chunk = Result<Vec<u8>, String>;

fn chunk(text: &str) -> Chunk {
    Ok(text.as_bytes().to_vec())
}

async fn next_snapshot(
    updates: &mut tokio::sync::broadcast::Receiver<ConversationUpdate>,
) -> chatfeed_core::MessageRecord {
    loop {
        match updates.recv().await.expect("update channel closed") {
            ConversationUpdate::Snapshot { record, .. } => return record,
            _ => continue,
        }
    }
}

#[tokio::test]
async fn test_drive_end_to_end_with_byte_chunks() {
    let clock = ManualClock::new();
    let shared = Conversation::default()
        .with_clock(Arc::new(clock.clone()))
        .into_shared();
    let handle = shared
        .lock()
        .unwrap()
        .begin_exchange(ExchangeRequest::new("hello"));

    let body = concat!(
        "data: {\"type\":\"thread_info\",\"thread_id\":\"T1\"}\n",
        "data: {\"type\":\"content\",\"content\":\"Hallo \"}\n",
        "data: {\"type\":\"content\",\"content\":\"Wélt 🦀\"}\n",
        "data: {\"type\":\"stream_complete\"}\n",
    );
    // Seven-byte chunks cut through multi-byte characters
    let chunks: Vec<Chunk> = body
        .as_bytes()
        .chunks(7)
        .map(|c| Ok(c.to_vec()))
        .collect();

    clock.advance(Duration::from_millis(50));
    let outcome = conversation::drive(&shared, &handle, stream::iter(chunks)).await;

    let record = match outcome {
        DriveOutcome::Completed(record) => record,
        other => panic!("Expected completion, got {:?}", other),
    };
    assert_eq!(record.content, "Hallo Wélt 🦀");
    assert_eq!(record.response_time_ms, Some(50));
    assert_eq!(shared.lock().unwrap().session_token(), Some("T1"));
}

#[tokio::test]
async fn test_superseded_exchange_stops_and_cannot_leak() {
    let shared = Conversation::default().into_shared();
    let mut updates = shared.lock().unwrap().subscribe();

    let old = shared
        .lock()
        .unwrap()
        .begin_exchange(ExchangeRequest::new("first"));
    let (old_tx, old_rx) = mpsc::unbounded::<Chunk>();
    let old_task = conversation::spawn(Arc::clone(&shared), old.clone(), old_rx);

    assert_eq!(next_snapshot(&mut updates).await.content, "");
    old_tx
        .unbounded_send(chunk("data: {\"type\":\"content\",\"content\":\"old\"}\n"))
        .unwrap();
    assert_eq!(next_snapshot(&mut updates).await.content, "old");

    let new = shared
        .lock()
        .unwrap()
        .begin_exchange(ExchangeRequest::new("second"));
    assert_eq!(old_task.await.unwrap(), DriveOutcome::Cancelled);

    // The abandoned transport keeps talking; nobody is listening
    let _ = old_tx.unbounded_send(chunk("data: {\"type\":\"content\",\"content\":\"LEAK\"}\n"));

    let (new_tx, new_rx) = mpsc::unbounded::<Chunk>();
    let new_task = conversation::spawn(Arc::clone(&shared), new.clone(), new_rx);
    new_tx
        .unbounded_send(chunk("data: {\"type\":\"content\",\"content\":\"fresh\"}\ndata: {\"type\":\"stream_complete\"}\n"))
        .unwrap();

    let outcome = new_task.await.unwrap();
    let record = outcome.record().cloned().unwrap();
    assert_eq!(record.content, "fresh");
    assert_eq!(record.status, MessageStatus::Completed);

    let messages = shared.lock().unwrap().messages();
    assert!(messages.iter().all(|m| !m.content.contains("LEAK")));
}

#[tokio::test]
async fn test_explicit_cancel_releases_pending_reader() {
    let shared = Conversation::default().into_shared();
    let handle = shared
        .lock()
        .unwrap()
        .begin_exchange(ExchangeRequest::new("q"));

    // A transport that never yields
    let task = conversation::spawn(
        Arc::clone(&shared),
        handle.clone(),
        stream::pending::<Chunk>(),
    );

    tokio::time::sleep(Duration::from_millis(10)).await;
    shared.lock().unwrap().cancel(&handle);

    let outcome = tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("read loop did not stop after cancel")
        .unwrap();
    assert_eq!(outcome, DriveOutcome::Cancelled);
}

#[tokio::test]
async fn test_transport_fault_uses_generic_description() {
    let shared = Conversation::default().into_shared();
    let handle = shared
        .lock()
        .unwrap()
        .begin_exchange(ExchangeRequest::new("q"));

    let items = vec![
        chunk("data: {\"type\":\"content\",\"content\":\"part\"}\n"),
        Err("502 Bad Gateway".to_string()),
    ];
    let outcome = conversation::drive(&shared, &handle, stream::iter(items)).await;

    let expected = format!(
        "Error: {}",
        shared.lock().unwrap().config().messages.transport_error
    );
    match outcome {
        DriveOutcome::Errored(record) => assert_eq!(record.content, expected),
        other => panic!("Expected errored outcome, got {:?}", other),
    }
}

#[tokio::test]
async fn test_stalled_stream() {
    let shared = Conversation::default().into_shared();
    let handle = shared
        .lock()
        .unwrap()
        .begin_exchange(ExchangeRequest::new("q"));

    let items = vec![chunk("data: {\"type\":\"content\",\"content\":\"half\"}\ndata: {\"type\":")];
    let outcome = conversation::drive(&shared, &handle, stream::iter(items)).await;

    match outcome {
        DriveOutcome::Stalled(record) => {
            assert!(record.streaming());
            assert_eq!(record.content, "half");
        }
        other => panic!("Expected stalled outcome, got {:?}", other),
    }
}

#[test]
fn test_drive_is_pending_until_cancelled() {
    let shared = Conversation::default().into_shared();
    let handle = shared
        .lock()
        .unwrap()
        .begin_exchange(ExchangeRequest::new("q"));

    let (tx, rx) = mpsc::unbounded::<Chunk>();
    let mut task = tokio_test::task::spawn(conversation::drive(&shared, &handle, rx));
    tokio_test::assert_pending!(task.poll());

    tx.unbounded_send(chunk("data: {\"type\":\"content\",\"content\":\"x\"}\n"))
        .unwrap();
    tokio_test::assert_pending!(task.poll());

    handle.cancellation().cancel();
    assert!(task.is_woken());
    let outcome = tokio_test::assert_ready!(task.poll());
    assert_eq!(outcome, DriveOutcome::Cancelled);
    assert_eq!(shared.lock().unwrap().live_record().unwrap().content, "x");
}
