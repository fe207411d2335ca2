//! Background polling: dedup across cycles, re-entrant deletes from the
//! handler, lifecycle rules and operation serialization.

mod common;

use common::{fast_options, open_reader, open_reader_with, part, record};
use smsrelay::error::SmsError;
use smsrelay::message::LogicalMessage;
use smsrelay::poller::PollState;
use smsrelay::reassembly::IncompletePolicy;
use smsrelay::transport::memory::MemoryTransport;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

const TICK: Duration = Duration::from_millis(10);

fn collector() -> (
    mpsc::UnboundedSender<LogicalMessage>,
    mpsc::UnboundedReceiver<LogicalMessage>,
) {
    mpsc::unbounded_channel()
}

async fn next(rx: &mut mpsc::UnboundedReceiver<LogicalMessage>) -> LogicalMessage {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("message delivered in time")
        .expect("channel open")
}

#[tokio::test]
async fn message_is_delivered_once_across_cycles() {
    let modem = MemoryTransport::new();
    modem.insert(1, record("+100", "hello"));
    let reader = open_reader(&modem).await;

    let (tx, mut rx) = collector();
    reader
        .start_polling(TICK, move |msg| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(msg);
            }
        })
        .await
        .unwrap();

    let first = next(&mut rx).await;
    assert_eq!(first.full_text, "hello");

    // several more cycles see the same stored message
    tokio::time::sleep(TICK * 8).await;
    reader.stop_polling().await;

    assert!(rx.try_recv().is_err(), "duplicate delivery");
    assert!(modem.calls().list >= 3);
}

#[tokio::test]
async fn handler_may_delete_during_delivery() {
    let modem = MemoryTransport::new();
    modem.insert(1, part("+100", 9, 1, 2, "Hel"));
    modem.insert(2, part("+100", 9, 2, 2, "lo"));
    modem.insert(3, record("+200", "bye"));
    let reader = open_reader(&modem).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handler_reader = reader.clone();
    reader
        .start_polling(TICK, move |msg: LogicalMessage| {
            let tx = tx.clone();
            let reader = handler_reader.clone();
            async move {
                for handle in msg.handles() {
                    let deleted = reader.delete_message(handle).await;
                    let _ = tx.send((handle, deleted.is_ok()));
                }
            }
        })
        .await
        .unwrap();

    let mut deleted = Vec::new();
    for _ in 0..3 {
        let item = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("handler must not deadlock")
            .unwrap();
        deleted.push(item);
    }
    reader.stop_polling().await;

    deleted.sort();
    assert_eq!(deleted, vec![(1, true), (2, true), (3, true)]);
    assert!(modem.stored_handles().is_empty());
}

#[tokio::test]
async fn panicking_handler_does_not_end_polling() {
    let modem = MemoryTransport::new();
    modem.insert(1, record("+100", "boom"));
    let reader = open_reader(&modem).await;

    let (tx, mut rx) = collector();
    reader
        .start_polling(TICK, move |msg: LogicalMessage| {
            let tx = tx.clone();
            async move {
                if msg.full_text == "boom" {
                    panic!("handler rejected message");
                }
                let _ = tx.send(msg);
            }
        })
        .await
        .unwrap();

    tokio::time::sleep(TICK * 5).await;
    modem.insert(2, record("+100", "after"));

    let delivered = next(&mut rx).await;
    assert_eq!(delivered.full_text, "after");
    assert_eq!(reader.state(), PollState::Running);
    assert_eq!(modem.live_clients(), 1);

    reader.stop_polling().await;
    assert_eq!(reader.state(), PollState::Stopped);
    assert_eq!(modem.live_clients(), 0);
}

#[tokio::test]
async fn stop_is_idempotent_and_releases_the_client() {
    let modem = MemoryTransport::new();
    let reader = open_reader(&modem).await;

    reader.start_polling(TICK, |_msg| async {}).await.unwrap();
    assert_eq!(reader.state(), PollState::Running);
    assert_eq!(modem.live_clients(), 1);

    reader.stop_polling().await;
    assert_eq!(reader.state(), PollState::Stopped);
    assert_eq!(modem.live_clients(), 0);
    assert_eq!(modem.calls().release, 1);

    reader.stop_polling().await;
    assert_eq!(modem.calls().release, 1);
}

#[tokio::test]
async fn zero_interval_rules() {
    let modem = MemoryTransport::new();
    let reader = open_reader(&modem).await;

    let err = reader
        .start_polling(Duration::ZERO, |_msg| async {})
        .await
        .unwrap_err();
    assert!(matches!(err, SmsError::InvalidInterval));
    assert_eq!(reader.state(), PollState::Stopped);
    assert_eq!(modem.calls().allocate, 0);

    reader.start_polling(TICK, |_msg| async {}).await.unwrap();
    // accidental double start while running is ignored
    reader
        .start_polling(Duration::ZERO, |_msg| async {})
        .await
        .unwrap();
    assert_eq!(modem.calls().allocate, 1);
    assert_eq!(reader.state(), PollState::Running);

    reader.stop_polling().await;
}

#[tokio::test]
async fn restart_uses_a_fresh_client_and_dedup_set() {
    let modem = MemoryTransport::new();
    modem.insert(5, record("+100", "again"));
    let reader = open_reader(&modem).await;

    let (tx, mut rx) = collector();
    let handler_tx = tx.clone();
    reader
        .start_polling(TICK, move |msg| {
            let tx = handler_tx.clone();
            async move {
                let _ = tx.send(msg);
            }
        })
        .await
        .unwrap();
    assert_eq!(next(&mut rx).await.primary_handle(), 5);

    reader
        .start_polling(TICK * 2, move |msg| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(msg);
            }
        })
        .await
        .unwrap();
    assert_eq!(next(&mut rx).await.primary_handle(), 5);
    reader.stop_polling().await;

    let calls = modem.calls();
    assert_eq!(calls.allocate, 2);
    assert_eq!(calls.release, 2);
    assert_eq!(modem.live_clients(), 0);
}

#[tokio::test]
async fn deleted_handle_is_delivered_again_when_reused() {
    let modem = MemoryTransport::new();
    modem.insert(1, record("+100", "first"));
    let reader = open_reader(&modem).await;

    let (tx, mut rx) = collector();
    reader
        .start_polling(TICK, move |msg| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(msg);
            }
        })
        .await
        .unwrap();
    assert_eq!(next(&mut rx).await.full_text, "first");

    // one-shot delete while polling shares the persistent client
    reader.delete_message(1).await.unwrap();
    modem.insert(1, record("+100", "second"));
    assert_eq!(next(&mut rx).await.full_text, "second");
    reader.stop_polling().await;

    assert_eq!(modem.calls().allocate, 1);
}

#[tokio::test]
async fn one_shot_reads_never_overlap_poll_cycles() {
    let modem = MemoryTransport::new().with_delay(Duration::from_millis(2));
    for handle in 1..=4 {
        modem.insert(handle, record("+100", &format!("m{}", handle)));
    }
    let reader = open_reader(&modem).await;
    reader
        .start_polling(Duration::from_millis(1), |_msg| async {})
        .await
        .unwrap();

    let mut one_shots = Vec::new();
    for _ in 0..4 {
        let reader = reader.clone();
        one_shots.push(tokio::spawn(async move { reader.read_all_once().await }));
    }
    for task in one_shots {
        let messages = task.await.unwrap().unwrap();
        assert_eq!(messages.len(), 4);
    }
    reader.stop_polling().await;

    assert_eq!(modem.max_in_flight(), 1);
}

#[tokio::test]
async fn hold_policy_waits_for_the_missing_part() {
    let modem = MemoryTransport::new();
    modem.insert(1, part("+100", 3, 1, 2, "Hel"));
    let mut options = fast_options();
    options.incomplete = IncompletePolicy::Hold;
    options.hold_timeout = Duration::from_secs(3600);
    let reader = open_reader_with(&modem, options).await;

    let (tx, mut rx) = collector();
    reader
        .start_polling(TICK, move |msg| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(msg);
            }
        })
        .await
        .unwrap();

    tokio::time::sleep(TICK * 5).await;
    assert!(rx.try_recv().is_err(), "incomplete group must be held");

    modem.insert(2, part("+100", 3, 2, 2, "lo"));
    let message = next(&mut rx).await;
    assert_eq!(message.full_text, "Hello");
    assert_eq!(message.handles(), vec![1, 2]);
    reader.stop_polling().await;
}

#[tokio::test]
async fn close_stops_polling_first() {
    let modem = MemoryTransport::new();
    let reader = open_reader(&modem).await;
    reader.start_polling(TICK, |_msg| async {}).await.unwrap();

    reader.close().await;
    assert_eq!(reader.state(), PollState::Stopped);
    assert_eq!(modem.live_clients(), 0);
    assert!(!modem.is_device_open());
}
