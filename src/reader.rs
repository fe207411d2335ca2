//! # SMS Reader
//!
//! [`SmsReader`] is the orchestrator facade. It owns the device session, the
//! operation bridge, the decoder and the reassembler, and exposes one-shot
//! calls next to a background polling loop.
//!
//! ## Locking
//!
//! - The **operation lock** (`tokio::sync::Mutex`) wraps every
//!   enumerate/fetch/delete sequence, whether it comes from a one-shot call
//!   or a poll cycle. Only one sequence touches the modem at a time.
//! - The **persistent-client lock** guards the polling session's client id.
//!   It is only held to copy or swap the id.
//! - The **seen lock** lives inside [`SeenSet`].
//!
//! The polling handler runs after the operation lock is released, so it may
//! call [`SmsReader::delete_message`] for the message it was just given. It
//! must not call [`SmsReader::stop_polling`]: stopping waits for the running
//! cycle, which is the handler itself.
//!
//! ## Example
//!
//! ```rust,no_run
//! use smsrelay::decoder::JsonRecordDecoder;
//! use smsrelay::reader::{ReaderOptions, SmsReader};
//! use smsrelay::transport::spool::SpoolTransport;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let transport = Arc::new(SpoolTransport::new(Duration::from_secs(5))?);
//! let options = ReaderOptions::new("/var/spool/smsrelay");
//! let reader = SmsReader::open(transport, Arc::new(JsonRecordDecoder), options).await?;
//! for message in reader.read_all_once().await? {
//!     println!("{}: {}", message.sender, message.full_text);
//! }
//! reader.close().await;
//! # Ok(())
//! # }
//! ```

use crate::bridge::{OperationBridge, RetryPolicy};
use crate::config::Config;
use crate::decoder::MessageDecoder;
use crate::error::SmsError;
use crate::message::LogicalMessage;
use crate::metrics;
use crate::pipeline::{self, BatchOutcome};
use crate::poller::{PollState, PollerTask, SeenSet};
use crate::reassembly::{IncompletePolicy, Reassembler};
use crate::session::{SessionHandle, SessionKind, SessionManager};
use crate::transport::{ClientId, ModemTransport};
use log::{debug, error, info, warn};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Settings for [`SmsReader::open`].
#[derive(Debug, Clone)]
pub struct ReaderOptions {
    pub device_path: String,
    pub allocation: RetryPolicy,
    pub fetch: RetryPolicy,
    pub delete: RetryPolicy,
    pub incomplete: IncompletePolicy,
    pub hold_timeout: Duration,
}

impl ReaderOptions {
    pub fn new(device_path: impl Into<String>) -> Self {
        Self {
            device_path: device_path.into(),
            allocation: RetryPolicy::allocation_default(),
            fetch: RetryPolicy::fetch_default(),
            delete: RetryPolicy::delete_default(),
            incomplete: IncompletePolicy::EmitPartial,
            hold_timeout: Duration::from_secs(60),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            device_path: config.modem.device_path.clone(),
            allocation: config.retry.allocation,
            fetch: config.retry.fetch,
            delete: config.retry.delete,
            incomplete: config.reassembly.incomplete,
            hold_timeout: config.reassembly.hold_timeout(),
        }
    }
}

struct Inner {
    sessions: SessionManager,
    bridge: OperationBridge,
    decoder: Arc<dyn MessageDecoder>,
    reassembler: Reassembler,
    op_lock: tokio::sync::Mutex<()>,
    persistent: Mutex<Option<ClientId>>,
    seen: SeenSet,
    state: Mutex<PollState>,
    /// Serializes start/stop and holds the running loop.
    lifecycle: tokio::sync::Mutex<Option<PollerTask>>,
}

impl Inner {
    fn persistent_client(&self) -> Option<ClientId> {
        *self.persistent.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn set_state(&self, state: PollState) {
        *self.state.lock().unwrap_or_else(|p| p.into_inner()) = state;
    }

    /// Persistent client when polling, otherwise a fresh transient one.
    /// Caller must hold the operation lock.
    async fn checkout(&self) -> Result<SessionHandle, SmsError> {
        if let Some(client) = self.persistent_client() {
            return Ok(SessionHandle {
                client,
                kind: SessionKind::Persistent,
            });
        }
        let client = self.sessions.acquire_client().await?;
        Ok(SessionHandle {
            client,
            kind: SessionKind::Transient,
        })
    }

    async fn checkin(&self, session: SessionHandle) {
        if session.is_transient() {
            self.sessions.release_client(session.client).await;
        }
    }

    async fn read_batch(&self, client: ClientId) -> Result<BatchOutcome, SmsError> {
        pipeline::read_all(&self.bridge, self.decoder.as_ref(), &self.reassembler, client).await
    }

    async fn poll_cycle<H, Fut>(&self, handler: &H)
    where
        H: Fn(LogicalMessage) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let staged = {
            let _op = self.op_lock.lock().await;
            let Some(client) = self.persistent_client() else {
                warn!("Poll cycle skipped: no persistent client");
                return;
            };
            match self.read_batch(client).await {
                Ok(outcome) => {
                    if outcome.failed > 0 {
                        debug!(
                            "Poll cycle: {} listed, {} skipped",
                            outcome.listed, outcome.failed
                        );
                    }
                    self.seen.stage_unseen(outcome.messages)
                }
                Err(e) => {
                    warn!("Poll cycle failed: {}", e);
                    return;
                }
            }
        };

        if !staged.is_empty() {
            debug!("Delivering {} new message(s)", staged.len());
            metrics::add_delivered(staged.len() as u64);
        }
        // Each delivery runs as its own task so a panicking handler only
        // loses that message.
        for message in staged {
            let handle = message.primary_handle();
            if let Err(e) = tokio::spawn(handler(message)).await {
                error!("Handler for message {} ended abnormally: {}", handle, e);
            }
        }
    }
}

/// Orchestrates reads, deletes and polling over one modem device.
#[derive(Clone)]
pub struct SmsReader {
    inner: Arc<Inner>,
}

impl SmsReader {
    /// Open the device and build a reader. Fails with
    /// [`SmsError::DeviceUnavailable`] if the device cannot be opened.
    pub async fn open(
        transport: Arc<dyn ModemTransport>,
        decoder: Arc<dyn MessageDecoder>,
        options: ReaderOptions,
    ) -> Result<Self, SmsError> {
        let sessions = SessionManager::new(transport.clone(), options.allocation);
        sessions.open_device(&options.device_path).await?;
        let inner = Inner {
            sessions,
            bridge: OperationBridge::new(transport, options.fetch, options.delete),
            decoder,
            reassembler: Reassembler::new(options.incomplete, options.hold_timeout),
            op_lock: tokio::sync::Mutex::new(()),
            persistent: Mutex::new(None),
            seen: SeenSet::new(),
            state: Mutex::new(PollState::Stopped),
            lifecycle: tokio::sync::Mutex::new(None),
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn state(&self) -> PollState {
        *self.inner.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Read and reassemble every stored message once. Per-message failures
    /// only shrink the result.
    pub async fn read_all_once(&self) -> Result<Vec<LogicalMessage>, SmsError> {
        let inner = &self.inner;
        let _op = inner.op_lock.lock().await;
        let session = inner.checkout().await?;
        let result = inner.read_batch(session.client).await;
        inner.checkin(session).await;
        let outcome = result?;
        info!(
            "Read {} message(s) from {} stored fragment(s)",
            outcome.messages.len(),
            outcome.listed
        );
        Ok(outcome.messages)
    }

    /// Handles currently stored on the device.
    pub async fn list_handles(&self) -> Result<Vec<u32>, SmsError> {
        let inner = &self.inner;
        let _op = inner.op_lock.lock().await;
        let session = inner.checkout().await?;
        let result = inner.bridge.enumerate(session.client).await;
        inner.checkin(session).await;
        result
    }

    /// Delete one stored fragment. On success the handle is forgotten by the
    /// dedup tracker so a new message stored at that index is delivered.
    pub async fn delete_message(&self, handle: u32) -> Result<(), SmsError> {
        let inner = &self.inner;
        {
            let _op = inner.op_lock.lock().await;
            let session = inner.checkout().await?;
            let result = inner.bridge.delete_by_handle(session.client, handle).await;
            inner.checkin(session).await;
            result?;
        }
        metrics::inc_deletes();
        inner.seen.remove(handle);
        debug!("Deleted message {}", handle);
        Ok(())
    }

    /// Start the background poll loop, delivering each newly seen message to
    /// `handler` in handle order.
    ///
    /// While running, a zero `interval` is ignored and a positive one
    /// restarts the loop with a fresh client and an empty dedup set. A zero
    /// `interval` while stopped is rejected.
    pub async fn start_polling<H, Fut>(&self, interval: Duration, handler: H) -> Result<(), SmsError>
    where
        H: Fn(LogicalMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if lifecycle.as_ref().is_some_and(PollerTask::is_finished) {
            warn!("Poll loop exited on its own; treating it as stopped");
            if let Some(task) = lifecycle.take() {
                self.shutdown_loop(task).await;
            }
        }
        if lifecycle.is_some() {
            if interval.is_zero() {
                debug!("start_polling ignored: already running");
                return Ok(());
            }
            info!("Restarting poll loop with interval {:?}", interval);
            if let Some(task) = lifecycle.take() {
                self.shutdown_loop(task).await;
            }
        } else if interval.is_zero() {
            return Err(SmsError::InvalidInterval);
        }

        let inner = &self.inner;
        let client = inner.sessions.acquire_client().await?;
        *inner.persistent.lock().unwrap_or_else(|p| p.into_inner()) = Some(client);
        inner.seen.clear();
        inner.set_state(PollState::Running);

        let loop_inner = self.inner.clone();
        let handler = Arc::new(handler);
        let task = PollerTask::spawn(interval, move || {
            let inner = loop_inner.clone();
            let handler = handler.clone();
            async move { inner.poll_cycle(handler.as_ref()).await }
        });
        *lifecycle = Some(task);
        info!("Polling every {:?} using {}", interval, client);
        Ok(())
    }

    /// Stop the poll loop, wait for its current cycle and release the
    /// persistent client. No-op when already stopped.
    pub async fn stop_polling(&self) {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        let Some(task) = lifecycle.take() else {
            return;
        };
        self.shutdown_loop(task).await;
        info!("Polling stopped");
    }

    async fn shutdown_loop(&self, task: PollerTask) {
        let inner = &self.inner;
        inner.set_state(PollState::Stopping);
        task.stop().await;
        let client = {
            let _op = inner.op_lock.lock().await;
            let mut slot = inner.persistent.lock().unwrap_or_else(|p| p.into_inner());
            slot.take()
        };
        if let Some(client) = client {
            inner.sessions.release_client(client).await;
        }
        inner.seen.clear();
        inner.set_state(PollState::Stopped);
    }

    /// Stop polling and close the device.
    pub async fn close(&self) {
        self.stop_polling().await;
        self.inner.sessions.close_device().await;
    }
}
