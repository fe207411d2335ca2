//! Spool-directory message store.
//!
//! Many deployments already run a modem manager that drains the SIM and drops
//! each received fragment into a spool directory. This transport exposes such
//! a directory through the [`ModemTransport`] capability so the orchestrator
//! can poll it like a device:
//!
//! - the "device path" is the spool directory;
//! - every stored fragment is a file named `<index>.sms` holding the raw
//!   record bytes (hidden and non-numeric files are ignored);
//! - a producer holds an exclusive `fs2` lock while writing a record. A read
//!   that cannot take a shared lock within the configured wait reports
//!   [`TransportError::Timeout`], which the bridge retries.
//!
//! The spool keeps no read state, so every stored record matches the unread
//! filter until it is deleted.
//!
//! Requests are executed in order on a dedicated I/O thread and completed
//! from that thread.

use super::{
    ClientId, Completion, DeleteRequest, DeviceId, ListRequest, ModemTransport, RawReadRequest,
};
use crate::error::TransportError;
use fs2::FileExt;
use log::{debug, trace, warn};
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::{Duration, Instant};

const SPOOL_EXTENSION: &str = "sms";
const LOCK_POLL: Duration = Duration::from_millis(25);

/// `None` means the I/O thread is gone and the request must fail.
type Job = Box<dyn FnOnce(Option<&mut SpoolState>) + Send>;

struct SpoolState {
    root: Option<PathBuf>,
    clients: HashSet<u32>,
    next_client: u32,
    lock_wait: Duration,
}

impl SpoolState {
    fn root(&self) -> Result<&Path, TransportError> {
        self.root
            .as_deref()
            .ok_or_else(|| TransportError::Failed("spool not open".into()))
    }

    fn check_client(&self, client: ClientId) -> Result<&Path, TransportError> {
        if !self.clients.contains(&client.0) {
            return Err(TransportError::Failed(format!("unknown {}", client)));
        }
        self.root()
    }
}

/// [`ModemTransport`] backed by a spool directory.
pub struct SpoolTransport {
    jobs: mpsc::Sender<Job>,
}

impl SpoolTransport {
    /// Start the spool I/O thread. `lock_wait` bounds how long a request waits
    /// for a producer's lock before reporting a timeout.
    pub fn new(lock_wait: Duration) -> std::io::Result<Self> {
        let (jobs, rx) = mpsc::channel::<Job>();
        std::thread::Builder::new()
            .name("spool-io".into())
            .spawn(move || {
                let mut state = SpoolState {
                    root: None,
                    clients: HashSet::new(),
                    next_client: 0,
                    lock_wait,
                };
                while let Ok(job) = rx.recv() {
                    job(Some(&mut state));
                }
                debug!("spool I/O thread exiting");
            })?;
        Ok(Self { jobs })
    }

    fn submit<T, F>(&self, done: Completion<T>, work: F)
    where
        T: Send + 'static,
        F: FnOnce(&mut SpoolState) -> Result<T, TransportError> + Send + 'static,
    {
        let job: Job = Box::new(move |state| match state {
            Some(state) => done(work(state)),
            None => done(Err(TransportError::Failed("spool I/O thread stopped".into()))),
        });
        if let Err(mpsc::SendError(job)) = self.jobs.send(job) {
            warn!("spool I/O thread is gone; failing request");
            job(None);
        }
    }
}

fn record_path(root: &Path, index: u32) -> PathBuf {
    root.join(format!("{}.{}", index, SPOOL_EXTENSION))
}

fn parse_index(path: &Path) -> Option<u32> {
    if path.extension().and_then(|e| e.to_str()) != Some(SPOOL_EXTENSION) {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    if stem.starts_with('.') {
        return None;
    }
    stem.parse().ok()
}

fn io_failure(context: &str, e: std::io::Error) -> TransportError {
    TransportError::Failed(format!("{}: {}", context, e))
}

fn is_contended(e: &std::io::Error) -> bool {
    e.kind() == std::io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Wait up to `budget` for `try_lock` to succeed. Only contention is waited
/// out; any other lock error is permanent.
fn lock_within(
    file: &File,
    budget: Duration,
    try_lock: fn(&File) -> std::io::Result<()>,
) -> Result<(), TransportError> {
    let deadline = Instant::now() + budget;
    loop {
        match try_lock(file) {
            Ok(()) => return Ok(()),
            Err(e) if !is_contended(&e) => return Err(io_failure("lock record", e)),
            Err(_) if Instant::now() < deadline => std::thread::sleep(LOCK_POLL),
            Err(_) => return Err(TransportError::Timeout),
        }
    }
}

fn list_records(root: &Path) -> Result<Vec<u32>, TransportError> {
    let entries = fs::read_dir(root).map_err(|e| io_failure("read spool", e))?;
    let mut handles: Vec<u32> = entries
        .flatten()
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|entry| parse_index(&entry.path()))
        .collect();
    handles.sort_unstable();
    Ok(handles)
}

fn read_record(root: &Path, index: u32, wait: Duration) -> Result<Vec<u8>, TransportError> {
    let path = record_path(root, index);
    let mut file = File::open(&path).map_err(|e| io_failure("open record", e))?;
    lock_within(&file, wait, |f| FileExt::try_lock_shared(f))?;
    let mut raw = Vec::new();
    let read = file.read_to_end(&mut raw);
    let _ = FileExt::unlock(&file);
    read.map_err(|e| io_failure("read record", e))?;
    trace!("spool read {} ({} bytes)", path.display(), raw.len());
    Ok(raw)
}

fn delete_record(root: &Path, index: u32, wait: Duration) -> Result<(), TransportError> {
    let path = record_path(root, index);
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&path)
        .map_err(|e| io_failure("open record", e))?;
    lock_within(&file, wait, |f| FileExt::try_lock_exclusive(f))?;
    let removed = fs::remove_file(&path);
    let _ = FileExt::unlock(&file);
    removed.map_err(|e| io_failure("remove record", e))
}

impl ModemTransport for SpoolTransport {
    fn open(&self, path: &str, done: Completion<DeviceId>) {
        let path = PathBuf::from(path);
        self.submit(done, move |state| {
            if !path.is_dir() {
                return Err(TransportError::Failed(format!(
                    "{} is not a spool directory",
                    path.display()
                )));
            }
            debug!("spool opened at {}", path.display());
            state.root = Some(path);
            Ok(DeviceId(1))
        });
    }

    fn close(&self, _device: DeviceId, done: Completion<()>) {
        self.submit(done, |state| {
            state.root = None;
            state.clients.clear();
            Ok(())
        });
    }

    fn allocate_client(&self, _device: DeviceId, done: Completion<ClientId>) {
        self.submit(done, |state| {
            state.root()?;
            state.next_client = state.next_client.wrapping_add(1);
            let id = state.next_client;
            state.clients.insert(id);
            Ok(ClientId(id))
        });
    }

    fn release_client(&self, _device: DeviceId, client: ClientId, done: Completion<()>) {
        self.submit(done, move |state| {
            if state.clients.remove(&client.0) {
                Ok(())
            } else {
                Err(TransportError::Failed(format!("unknown {}", client)))
            }
        });
    }

    fn list_messages(&self, client: ClientId, _request: ListRequest, done: Completion<Vec<u32>>) {
        self.submit(done, move |state| list_records(state.check_client(client)?));
    }

    fn raw_read(&self, client: ClientId, request: RawReadRequest, done: Completion<Vec<u8>>) {
        self.submit(done, move |state| {
            let wait = state.lock_wait;
            read_record(state.check_client(client)?, request.index, wait)
        });
    }

    fn delete(&self, client: ClientId, request: DeleteRequest, done: Completion<()>) {
        self.submit(done, move |state| {
            let wait = state.lock_wait;
            delete_record(state.check_client(client)?, request.index, wait)
        });
    }
}
