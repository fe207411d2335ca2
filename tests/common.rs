//! Shared fixtures for the integration tests: record builders and a reader
//! wired to the scripted in-memory modem.
// Each test binary uses a different subset of these helpers.
#![allow(dead_code)]

use smsrelay::bridge::RetryPolicy;
use smsrelay::decoder::{DecodedMessage, JsonRecordDecoder};
use smsrelay::message::ConcatInfo;
use smsrelay::reader::{ReaderOptions, SmsReader};
use smsrelay::transport::memory::MemoryTransport;
use std::sync::Arc;

pub const DEVICE: &str = "/dev/cdc-wdm0";

/// A single-part spool record.
pub fn record(sender: &str, text: &str) -> Vec<u8> {
    DecodedMessage {
        sender: sender.to_string(),
        timestamp: "24/05/01,10:00:00+32".to_string(),
        text: text.to_string(),
        concat: None,
    }
    .to_record()
}

/// One part of a concatenated message.
pub fn part(sender: &str, reference: u16, part: u8, total: u8, text: &str) -> Vec<u8> {
    DecodedMessage {
        sender: sender.to_string(),
        timestamp: format!("24/05/01,10:00:0{}+32", part),
        text: text.to_string(),
        concat: Some(ConcatInfo {
            reference,
            part,
            total,
        }),
    }
    .to_record()
}

/// Default options with retry backoff disabled so tests stay fast.
pub fn fast_options() -> ReaderOptions {
    let mut options = ReaderOptions::new(DEVICE);
    options.fetch = RetryPolicy {
        max_retries: 3,
        ..RetryPolicy::none()
    };
    options
}

pub async fn open_reader(transport: &MemoryTransport) -> SmsReader {
    open_reader_with(transport, fast_options()).await
}

pub async fn open_reader_with(transport: &MemoryTransport, options: ReaderOptions) -> SmsReader {
    SmsReader::open(
        Arc::new(transport.clone()),
        Arc::new(JsonRecordDecoder),
        options,
    )
    .await
    .expect("open reader")
}
