//! Polling loop and dedup tracker.
//!
//! The loop runs as its own tokio task. Each iteration awaits one poll cycle
//! (supplied by the [`reader`](crate::reader)), then sleeps for the interval
//! or until a stop is signalled. Stopping never interrupts a cycle that is
//! already running; [`PollerTask::stop`] waits for it to finish.
//!
//! [`SeenSet`] remembers the primary handle of every message already handed
//! to the consumer so a message still stored on the device is delivered only
//! once across cycles.

use crate::message::LogicalMessage;
use crate::metrics;
use log::{debug, error};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Stopped,
    Running,
    Stopping,
}

impl std::fmt::Display for PollState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PollState::Stopped => "stopped",
            PollState::Running => "running",
            PollState::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// Primary handles already delivered during the current polling session.
#[derive(Debug, Default)]
pub struct SeenSet {
    handles: Mutex<HashSet<u32>>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<u32>> {
        self.handles.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Record `handle`; returns false if it was already present.
    pub fn insert_if_new(&self, handle: u32) -> bool {
        self.lock().insert(handle)
    }

    pub fn remove(&self, handle: u32) -> bool {
        self.lock().remove(&handle)
    }

    pub fn contains(&self, handle: u32) -> bool {
        self.lock().contains(&handle)
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Keep only messages whose primary handle has not been seen, recording
    /// them as seen. The result is ordered by primary handle.
    pub fn stage_unseen(&self, messages: Vec<LogicalMessage>) -> Vec<LogicalMessage> {
        let mut staged = {
            let mut seen = self.lock();
            let mut staged = Vec::with_capacity(messages.len());
            for message in messages {
                if seen.insert(message.primary_handle()) {
                    staged.push(message);
                } else {
                    metrics::inc_duplicates();
                }
            }
            staged
        };
        staged.sort_by_key(LogicalMessage::primary_handle);
        staged
    }
}

/// A running poll loop: the stop signal plus the task to join.
pub struct PollerTask {
    stop_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl PollerTask {
    /// Spawn a loop that awaits `cycle` once per `interval` until stopped.
    pub fn spawn<C, Fut>(interval: Duration, mut cycle: C) -> Self
    where
        C: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let join = tokio::spawn(async move {
            debug!("Poll loop started (interval {:?})", interval);
            loop {
                if *stop_rx.borrow() {
                    break;
                }
                cycle().await;
                metrics::inc_poll_cycles();
                let snap = metrics::snapshot();
                debug!(
                    "poll stats: cycles={} delivered={} duplicates={} fetch_retries={} fetch_failures={} alloc_retries={} deletes={}",
                    snap.poll_cycles,
                    snap.messages_delivered,
                    snap.duplicates_suppressed,
                    snap.fetch_retries,
                    snap.fetch_failures,
                    snap.allocation_retries,
                    snap.deletes
                );
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    changed = stop_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("Poll loop exited");
        });
        Self { stop_tx, join }
    }

    /// Signal the loop and wait for its current cycle to finish.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.join.await {
            error!("Poll loop task ended abnormally: {}", e);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}
