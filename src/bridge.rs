//! # Synchronous Operation Bridge
//!
//! Presents every callback-driven transport exchange as a single awaited call.
//! Each call creates its own one-shot completion signal, issues the request,
//! and suspends the calling task until the transport fires the completion.
//!
//! Timeouts are retried according to a [`RetryPolicy`]. A fetch that times out
//! resubmits the very same request; any other failure ends the call.
//!
//! The bridge does not serialize callers. Running two exchanges on the same
//! client concurrently is unsafe for the transport; the
//! [`reader`](crate::reader) holds the operation lock around every sequence.

use crate::error::{SmsError, TransportError};
use crate::metrics;
use crate::transport::{
    ClientId, Completion, DeleteRequest, ListRequest, ModemTransport, RawReadRequest,
};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Issue one transport request and wait for its completion.
pub(crate) async fn await_completion<T, F>(issue: F) -> Result<T, TransportError>
where
    T: Send + 'static,
    F: FnOnce(Completion<T>),
{
    let (tx, rx) = oneshot::channel();
    issue(Box::new(move |result| {
        let _ = tx.send(result);
    }));
    rx.await.unwrap_or(Err(TransportError::Dropped))
}

/// Retry schedule applied when a transport reports a timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Ignored when `retry_forever` is set.
    #[serde(default)]
    pub max_retries: u32,
    /// Keep resubmitting for as long as the transport times out.
    #[serde(default)]
    pub retry_forever: bool,
    /// Delay before the first retry; doubled for each further retry.
    #[serde(default)]
    pub initial_backoff_ms: u64,
    #[serde(default)]
    pub max_backoff_ms: u64,
}

impl RetryPolicy {
    /// Client allocation: three retries, no delay.
    pub fn allocation_default() -> Self {
        Self {
            max_retries: 3,
            retry_forever: false,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    pub fn fetch_default() -> Self {
        Self {
            max_retries: 7,
            retry_forever: false,
            initial_backoff_ms: 100,
            max_backoff_ms: 2000,
        }
    }

    /// Deletes are one-shot unless configured otherwise.
    pub fn delete_default() -> Self {
        Self::none()
    }

    pub fn none() -> Self {
        Self {
            max_retries: 0,
            retry_forever: false,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    /// Whether another attempt may follow `retries_done` retries.
    pub fn allows_retry(&self, retries_done: u32) -> bool {
        self.retry_forever || retries_done < self.max_retries
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        if self.initial_backoff_ms == 0 || retry == 0 {
            return Duration::ZERO;
        }
        let factor = 1u64.checked_shl(retry - 1).unwrap_or(u64::MAX);
        let mut ms = self.initial_backoff_ms.saturating_mul(factor);
        if self.max_backoff_ms > 0 {
            ms = ms.min(self.max_backoff_ms);
        }
        Duration::from_millis(ms)
    }
}

/// Run `attempt` until it succeeds, fails with a non-timeout error, or the
/// policy is exhausted. Returns the final result and the number of attempts.
pub(crate) async fn with_timeout_retry<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut attempt: F,
) -> (Result<T, TransportError>, u32)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, TransportError>>,
{
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match attempt().await {
            Err(TransportError::Timeout) if policy.allows_retry(attempts - 1) => {
                let delay = policy.backoff(attempts);
                debug!("{} timed out (attempt {}), retrying in {:?}", what, attempts, delay);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            other => return (other, attempts),
        }
    }
}

/// Awaitable view of a [`ModemTransport`]'s message operations.
#[derive(Clone)]
pub struct OperationBridge {
    transport: Arc<dyn ModemTransport>,
    fetch_policy: RetryPolicy,
    delete_policy: RetryPolicy,
}

impl OperationBridge {
    pub fn new(
        transport: Arc<dyn ModemTransport>,
        fetch_policy: RetryPolicy,
        delete_policy: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            fetch_policy,
            delete_policy,
        }
    }

    /// List unread SIM message handles. The storage/mode/tag filter is fixed.
    pub async fn enumerate(&self, client: ClientId) -> Result<Vec<u32>, SmsError> {
        let transport = self.transport.clone();
        await_completion(|done| transport.list_messages(client, ListRequest::unread_sim(), done))
            .await
            .map_err(SmsError::EnumerationFailed)
    }

    /// Fetch the raw bytes stored at `handle`, resubmitting on timeout.
    pub async fn fetch_raw(&self, client: ClientId, handle: u32) -> Result<Vec<u8>, SmsError> {
        let request = RawReadRequest::sim(handle);
        let what = format!("read of message {}", handle);
        let (result, attempts) = with_timeout_retry(&self.fetch_policy, &what, || {
            let transport = self.transport.clone();
            await_completion(move |done| transport.raw_read(client, request, done))
        })
        .await;
        if attempts > 1 {
            metrics::add_fetch_retries(u64::from(attempts - 1));
        }
        result.map_err(|source| {
            if source.is_timeout() {
                warn!("giving up on message {} after {} timed-out attempts", handle, attempts);
            }
            SmsError::FetchFailed {
                handle,
                attempts,
                source,
            }
        })
    }

    pub async fn delete_by_handle(&self, client: ClientId, handle: u32) -> Result<(), SmsError> {
        let request = DeleteRequest::sim(handle);
        let what = format!("delete of message {}", handle);
        let (result, _) = with_timeout_retry(&self.delete_policy, &what, || {
            let transport = self.transport.clone();
            await_completion(move |done| transport.delete(client, request, done))
        })
        .await;
        result.map_err(|source| SmsError::DeleteFailed { handle, source })
    }
}
