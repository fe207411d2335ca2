//! Process-wide counters for the relay.
//!
//! Plain relaxed atomics; [`snapshot`] copies them into a [`Snapshot`] that the
//! daemon logs once per poll cycle at debug level.
use std::sync::atomic::{AtomicU64, Ordering};

static POLL_CYCLES: AtomicU64 = AtomicU64::new(0);
static MESSAGES_DELIVERED: AtomicU64 = AtomicU64::new(0);
static DUPLICATES_SUPPRESSED: AtomicU64 = AtomicU64::new(0);
static FETCH_RETRIES: AtomicU64 = AtomicU64::new(0);
static FETCH_FAILURES: AtomicU64 = AtomicU64::new(0);
static ALLOCATION_RETRIES: AtomicU64 = AtomicU64::new(0);
static DELETES: AtomicU64 = AtomicU64::new(0);

pub fn inc_poll_cycles() {
    POLL_CYCLES.fetch_add(1, Ordering::Relaxed);
}

pub fn add_delivered(n: u64) {
    MESSAGES_DELIVERED.fetch_add(n, Ordering::Relaxed);
}

pub fn inc_duplicates() {
    DUPLICATES_SUPPRESSED.fetch_add(1, Ordering::Relaxed);
}

/// Timed-out fetch attempts that were resubmitted.
pub fn add_fetch_retries(n: u64) {
    FETCH_RETRIES.fetch_add(n, Ordering::Relaxed);
}

/// Handles dropped from a batch because fetch or decode failed.
pub fn inc_fetch_failures() {
    FETCH_FAILURES.fetch_add(1, Ordering::Relaxed);
}

pub fn add_allocation_retries(n: u64) {
    ALLOCATION_RETRIES.fetch_add(n, Ordering::Relaxed);
}

pub fn inc_deletes() {
    DELETES.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub poll_cycles: u64,
    pub messages_delivered: u64,
    pub duplicates_suppressed: u64,
    pub fetch_retries: u64,
    pub fetch_failures: u64,
    pub allocation_retries: u64,
    pub deletes: u64,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        poll_cycles: POLL_CYCLES.load(Ordering::Relaxed),
        messages_delivered: MESSAGES_DELIVERED.load(Ordering::Relaxed),
        duplicates_suppressed: DUPLICATES_SUPPRESSED.load(Ordering::Relaxed),
        fetch_retries: FETCH_RETRIES.load(Ordering::Relaxed),
        fetch_failures: FETCH_FAILURES.load(Ordering::Relaxed),
        allocation_retries: ALLOCATION_RETRIES.load(Ordering::Relaxed),
        deletes: DELETES.load(Ordering::Relaxed),
    }
}
