//! # smsrelay - SMS poller and relay for cellular modems
//!
//! smsrelay drains the message store of a cellular modem, stitches multi-part
//! SMS back together and hands every new message to a consumer exactly once
//! per polling session.
//!
//! ## Features
//!
//! - **Callback transports, sequential logic**: the modem is reached through a
//!   callback-driven [`transport::ModemTransport`]; the [`bridge`] turns each
//!   request into an awaited call with bounded timeout retries.
//! - **Fault-tolerant batches**: one unreadable message never sinks the batch.
//! - **Reassembly**: multi-part messages are ordered by part index, with an
//!   optional hold-until-complete policy.
//! - **Polling with dedup**: a background tokio task polls on an interval and
//!   suppresses messages already delivered.
//! - **Signed delivery**: the binary forwards messages to an HTTP relay with an
//!   HMAC-SHA256 signature and can delete them afterwards.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use smsrelay::decoder::JsonRecordDecoder;
//! use smsrelay::reader::{ReaderOptions, SmsReader};
//! use smsrelay::transport::spool::SpoolTransport;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let transport = Arc::new(SpoolTransport::new(Duration::from_secs(10))?);
//!     let reader = SmsReader::open(
//!         transport,
//!         Arc::new(JsonRecordDecoder),
//!         ReaderOptions::new("/var/spool/smsrelay"),
//!     )
//!     .await?;
//!
//!     reader
//!         .start_polling(Duration::from_secs(1), |msg| async move {
//!             println!("{}: {}", msg.sender, msg.full_text);
//!         })
//!         .await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     reader.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`transport`] - modem capability trait plus spool and in-memory stores
//! - [`decoder`] - raw record decoding capability
//! - [`session`] - device and client handle lifetime
//! - [`bridge`] - awaited operations and retry policy
//! - [`pipeline`] - one batch read
//! - [`reassembly`] - multi-part message assembly
//! - [`poller`] - polling task and dedup tracker
//! - [`reader`] - the orchestrator facade
//! - [`delivery`] - signed envelopes and the HTTP forwarder
//! - [`config`] - TOML configuration
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │    SmsReader    │ ← one-shot calls + polling loop
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │ Pipeline        │ ← enumerate, fetch, decode, reassemble
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │ Bridge/Session  │ ← awaited requests, retries, client handles
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │ ModemTransport  │ ← callback-driven device access
//! └─────────────────┘
//! ```

pub mod bridge;
pub mod config;
pub mod decoder;
pub mod delivery;
pub mod error;
pub mod logutil;
pub mod message;
pub mod metrics;
pub mod pipeline;
pub mod poller;
pub mod reader;
pub mod reassembly;
pub mod session;
pub mod transport;
