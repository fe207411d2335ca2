//! Scripted in-memory modem used by tests and local experiments.
//!
//! Completions are always delivered from a freshly spawned thread so callers
//! observe genuinely asynchronous behaviour. Faults (timeouts, permanent
//! failures) are injected per operation and counted down as they fire.
//!
//! ```
//! use smsrelay::decoder::JsonRecordDecoder;
//! use smsrelay::reader::{ReaderOptions, SmsReader};
//! use smsrelay::transport::memory::MemoryTransport;
//! use std::sync::Arc;
//!
//! let modem = MemoryTransport::new();
//! modem.insert(1, br#"{"sender":"+100","timestamp":"t","text":"hi"}"#.to_vec());
//! modem.time_out_reads(1, 2);
//!
//! let messages = tokio_test::block_on(async {
//!     let reader = SmsReader::open(
//!         Arc::new(modem.clone()),
//!         Arc::new(JsonRecordDecoder),
//!         ReaderOptions::new("mem0"),
//!     )
//!     .await?;
//!     reader.read_all_once().await
//! })
//! .unwrap();
//! assert_eq!(messages[0].full_text, "hi");
//! assert_eq!(modem.read_attempts(1), 3);
//! ```

use super::{
    ClientId, Completion, DeleteRequest, DeviceId, ListRequest, ModemTransport, RawReadRequest,
};
use crate::error::TransportError;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Per-operation call counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CallCounts {
    pub open: u32,
    pub close: u32,
    pub allocate: u32,
    pub release: u32,
    pub list: u32,
    pub read: u32,
    pub delete: u32,
}

#[derive(Default)]
struct MemoryState {
    store: BTreeMap<u32, Vec<u8>>,
    device_open: bool,
    next_client: u32,
    live_clients: HashSet<u32>,
    fail_open: bool,
    allocation_timeouts: u32,
    allocation_failure: Option<String>,
    fail_list: bool,
    read_timeouts: HashMap<u32, u32>,
    read_failures: HashSet<u32>,
    delete_timeouts: HashMap<u32, u32>,
    fail_release: bool,
    read_attempts: HashMap<u32, u32>,
    calls: CallCounts,
    in_flight: u32,
    max_in_flight: u32,
}

/// In-memory [`ModemTransport`] with fault injection and call accounting.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
    delay: Duration,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every completion by `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // A panicking completion thread must not wedge the rest of a test.
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Store raw message bytes at `handle`, replacing any previous content.
    pub fn insert(&self, handle: u32, raw: impl Into<Vec<u8>>) {
        self.lock().store.insert(handle, raw.into());
    }

    pub fn stored_handles(&self) -> Vec<u32> {
        self.lock().store.keys().copied().collect()
    }

    pub fn fail_open(&self) {
        self.lock().fail_open = true;
    }

    /// The next `count` allocations report a timeout.
    pub fn time_out_allocations(&self, count: u32) {
        self.lock().allocation_timeouts = count;
    }

    /// The next allocation fails permanently with `reason`.
    pub fn fail_next_allocation(&self, reason: &str) {
        self.lock().allocation_failure = Some(reason.to_string());
    }

    pub fn fail_listing(&self, fail: bool) {
        self.lock().fail_list = fail;
    }

    /// The next `count` reads of `handle` report a timeout.
    pub fn time_out_reads(&self, handle: u32, count: u32) {
        self.lock().read_timeouts.insert(handle, count);
    }

    /// Every read of `handle` fails permanently.
    pub fn fail_reads(&self, handle: u32) {
        self.lock().read_failures.insert(handle);
    }

    pub fn time_out_deletes(&self, handle: u32, count: u32) {
        self.lock().delete_timeouts.insert(handle, count);
    }

    pub fn fail_release(&self) {
        self.lock().fail_release = true;
    }

    pub fn calls(&self) -> CallCounts {
        self.lock().calls
    }

    pub fn read_attempts(&self, handle: u32) -> u32 {
        self.lock().read_attempts.get(&handle).copied().unwrap_or(0)
    }

    pub fn live_clients(&self) -> usize {
        self.lock().live_clients.len()
    }

    pub fn is_device_open(&self) -> bool {
        self.lock().device_open
    }

    /// Highest number of requests that were outstanding at the same time.
    pub fn max_in_flight(&self) -> u32 {
        self.lock().max_in_flight
    }

    fn complete<T: Send + 'static>(&self, result: Result<T, TransportError>, done: Completion<T>) {
        let state = self.state.clone();
        let delay = self.delay;
        {
            let mut s = self.lock();
            s.in_flight += 1;
            s.max_in_flight = s.max_in_flight.max(s.in_flight);
        }
        std::thread::spawn(move || {
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
            if let Ok(mut s) = state.lock() {
                s.in_flight = s.in_flight.saturating_sub(1);
            }
            done(result);
        });
    }

    fn check_client(state: &MemoryState, client: ClientId) -> Result<(), TransportError> {
        if state.live_clients.contains(&client.0) {
            Ok(())
        } else {
            Err(TransportError::Failed(format!("unknown {}", client)))
        }
    }
}

impl ModemTransport for MemoryTransport {
    fn open(&self, path: &str, done: Completion<DeviceId>) {
        let result = {
            let mut s = self.lock();
            s.calls.open += 1;
            if s.fail_open {
                Err(TransportError::Failed(format!("no such device: {}", path)))
            } else {
                s.device_open = true;
                Ok(DeviceId(1))
            }
        };
        self.complete(result, done);
    }

    fn close(&self, _device: DeviceId, done: Completion<()>) {
        let result = {
            let mut s = self.lock();
            s.calls.close += 1;
            s.device_open = false;
            Ok(())
        };
        self.complete(result, done);
    }

    fn allocate_client(&self, _device: DeviceId, done: Completion<ClientId>) {
        let result = {
            let mut s = self.lock();
            s.calls.allocate += 1;
            if !s.device_open {
                Err(TransportError::Failed("device closed".into()))
            } else if s.allocation_timeouts > 0 {
                s.allocation_timeouts -= 1;
                Err(TransportError::Timeout)
            } else if let Some(reason) = s.allocation_failure.take() {
                Err(TransportError::Failed(reason))
            } else {
                s.next_client += 1;
                let id = s.next_client;
                s.live_clients.insert(id);
                Ok(ClientId(id))
            }
        };
        self.complete(result, done);
    }

    fn release_client(&self, _device: DeviceId, client: ClientId, done: Completion<()>) {
        let result = {
            let mut s = self.lock();
            s.calls.release += 1;
            if s.fail_release {
                Err(TransportError::Failed("release rejected".into()))
            } else if s.live_clients.remove(&client.0) {
                Ok(())
            } else {
                Err(TransportError::Failed(format!("unknown {}", client)))
            }
        };
        self.complete(result, done);
    }

    fn list_messages(&self, client: ClientId, _request: ListRequest, done: Completion<Vec<u32>>) {
        let result = {
            let mut s = self.lock();
            s.calls.list += 1;
            Self::check_client(&s, client).and_then(|_| {
                if s.fail_list {
                    Err(TransportError::Failed("list rejected".into()))
                } else {
                    Ok(s.store.keys().copied().collect())
                }
            })
        };
        self.complete(result, done);
    }

    fn raw_read(&self, client: ClientId, request: RawReadRequest, done: Completion<Vec<u8>>) {
        let result = {
            let mut s = self.lock();
            s.calls.read += 1;
            *s.read_attempts.entry(request.index).or_insert(0) += 1;
            Self::check_client(&s, client).and_then(|_| {
                if let Some(left) = s.read_timeouts.get_mut(&request.index) {
                    if *left > 0 {
                        *left -= 1;
                        return Err(TransportError::Timeout);
                    }
                }
                if s.read_failures.contains(&request.index) {
                    return Err(TransportError::Failed(format!(
                        "read of index {} rejected",
                        request.index
                    )));
                }
                s.store.get(&request.index).cloned().ok_or_else(|| {
                    TransportError::Failed(format!("no message at index {}", request.index))
                })
            })
        };
        self.complete(result, done);
    }

    fn delete(&self, client: ClientId, request: DeleteRequest, done: Completion<()>) {
        let result = {
            let mut s = self.lock();
            s.calls.delete += 1;
            Self::check_client(&s, client).and_then(|_| {
                if let Some(left) = s.delete_timeouts.get_mut(&request.index) {
                    if *left > 0 {
                        *left -= 1;
                        return Err(TransportError::Timeout);
                    }
                }
                s.store.remove(&request.index).map(|_| ()).ok_or_else(|| {
                    TransportError::Failed(format!("no message at index {}", request.index))
                })
            })
        };
        self.complete(result, done);
    }
}
