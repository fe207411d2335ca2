//! One-shot reads through the batch pipeline: per-message failures, retries,
//! reassembly and transient client handling.

mod common;

use common::{fast_options, open_reader, open_reader_with, part, record};
use smsrelay::bridge::RetryPolicy;
use smsrelay::error::{SmsError, TransportError};
use smsrelay::reassembly::IncompletePolicy;
use smsrelay::transport::memory::MemoryTransport;
use std::time::Duration;

#[tokio::test]
async fn failed_fetch_only_drops_that_message() {
    let modem = MemoryTransport::new();
    for handle in 1..=5 {
        modem.insert(handle, record("+100", &format!("msg {}", handle)));
    }
    modem.fail_reads(3);

    let reader = open_reader(&modem).await;
    let mut messages = reader.read_all_once().await.expect("batch should not fail");
    messages.sort_by_key(|m| m.primary_handle());

    let handles: Vec<u32> = messages.iter().map(|m| m.primary_handle()).collect();
    assert_eq!(handles, vec![1, 2, 4, 5]);
    assert_eq!(modem.calls().read, 5);
}

#[tokio::test]
async fn empty_store_issues_no_reads() {
    let modem = MemoryTransport::new();
    let reader = open_reader(&modem).await;

    let messages = reader.read_all_once().await.unwrap();
    assert!(messages.is_empty());
    assert_eq!(modem.calls().list, 1);
    assert_eq!(modem.calls().read, 0);
}

#[tokio::test]
async fn timed_out_fetch_is_resubmitted() {
    let modem = MemoryTransport::new();
    modem.insert(2, record("+100", "slow"));
    modem.time_out_reads(2, 3);

    let reader = open_reader(&modem).await;
    let messages = reader.read_all_once().await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].full_text, "slow");
    assert_eq!(modem.read_attempts(2), 4);
}

#[tokio::test]
async fn fetch_gives_up_once_retries_are_exhausted() {
    let modem = MemoryTransport::new();
    modem.insert(1, record("+100", "fine"));
    modem.insert(2, record("+100", "stuck"));
    modem.time_out_reads(2, 100);

    let reader = open_reader(&modem).await;
    let messages = reader.read_all_once().await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].full_text, "fine");
    // first attempt plus three retries
    assert_eq!(modem.read_attempts(2), 4);
}

#[tokio::test]
async fn undecodable_record_is_skipped() {
    let modem = MemoryTransport::new();
    modem.insert(1, b"\x07\x00garbage".to_vec());
    modem.insert(2, record("+100", "ok"));

    let reader = open_reader(&modem).await;
    let messages = reader.read_all_once().await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].primary_handle(), 2);
}

#[tokio::test]
async fn multipart_message_is_reassembled_in_part_order() {
    let modem = MemoryTransport::new();
    modem.insert(4, part("+100", 7, 2, 2, "World"));
    modem.insert(3, part("+100", 7, 1, 2, "Hello "));
    modem.insert(5, record("+200", "standalone"));

    let reader = open_reader(&modem).await;
    let mut messages = reader.read_all_once().await.unwrap();
    messages.sort_by_key(|m| m.primary_handle());

    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].full_text, "Hello World");
    assert_eq!(messages[0].handles(), vec![3, 4]);
    assert_eq!(messages[0].sender, "+100");
    assert_eq!(messages[1].full_text, "standalone");
}

#[tokio::test]
async fn enumeration_failure_is_reported() {
    let modem = MemoryTransport::new();
    modem.insert(1, record("+100", "x"));
    modem.fail_listing(true);

    let reader = open_reader(&modem).await;
    let result = reader.read_all_once().await;
    assert!(matches!(result, Err(SmsError::EnumerationFailed(_))));
    assert_eq!(modem.calls().read, 0);
    assert_eq!(modem.live_clients(), 0, "transient client must be released");
}

#[tokio::test]
async fn one_shot_calls_release_their_transient_client() {
    let modem = MemoryTransport::new();
    modem.insert(1, record("+100", "a"));
    modem.insert(2, record("+100", "b"));

    let reader = open_reader(&modem).await;
    assert_eq!(reader.list_handles().await.unwrap(), vec![1, 2]);
    reader.read_all_once().await.unwrap();
    reader.delete_message(1).await.unwrap();

    let calls = modem.calls();
    assert_eq!(calls.allocate, 3);
    assert_eq!(calls.release, 3);
    assert_eq!(modem.live_clients(), 0);
    assert_eq!(modem.stored_handles(), vec![2]);
}

#[tokio::test]
async fn deleting_a_missing_message_fails() {
    let modem = MemoryTransport::new();
    let reader = open_reader(&modem).await;
    let result = reader.delete_message(42).await;
    assert!(matches!(result, Err(SmsError::DeleteFailed { handle: 42, .. })));
}

#[tokio::test]
async fn timed_out_delete_is_not_retried_by_default() {
    let modem = MemoryTransport::new();
    modem.insert(1, record("+100", "keep"));
    modem.time_out_deletes(1, 1);

    let reader = open_reader(&modem).await;
    let result = reader.delete_message(1).await;
    assert!(matches!(
        result,
        Err(SmsError::DeleteFailed {
            handle: 1,
            source: TransportError::Timeout
        })
    ));
    assert_eq!(modem.calls().delete, 1);
    assert_eq!(modem.stored_handles(), vec![1]);
}

#[tokio::test]
async fn delete_retries_when_configured() {
    let modem = MemoryTransport::new();
    modem.insert(1, record("+100", "gone"));
    modem.time_out_deletes(1, 2);

    let mut options = fast_options();
    options.delete = RetryPolicy {
        max_retries: 2,
        ..RetryPolicy::none()
    };
    let reader = open_reader_with(&modem, options).await;
    reader.delete_message(1).await.unwrap();
    assert_eq!(modem.calls().delete, 3);
    assert!(modem.stored_handles().is_empty());
}

#[tokio::test]
async fn held_group_is_flushed_once_the_store_is_empty() {
    let modem = MemoryTransport::new();
    modem.insert(1, part("+100", 5, 1, 2, "Hel"));

    let mut options = fast_options();
    options.incomplete = IncompletePolicy::Hold;
    options.hold_timeout = Duration::from_millis(50);
    let reader = open_reader_with(&modem, options).await;

    assert!(reader.read_all_once().await.unwrap().is_empty());
    reader.delete_message(1).await.unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;

    let messages = reader.read_all_once().await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].full_text, "Hel");
    assert!(messages[0].is_incomplete());
    assert_eq!(modem.calls().read, 1);
}

#[tokio::test]
async fn close_shuts_the_device() {
    let modem = MemoryTransport::new();
    let reader = open_reader(&modem).await;
    assert!(modem.is_device_open());
    reader.close().await;
    assert!(!modem.is_device_open());
    assert_eq!(modem.calls().close, 1);
}
