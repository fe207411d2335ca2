//! # Modem Transport Capability
//!
//! The orchestrator never talks to a modem directly. It consumes the
//! [`ModemTransport`] trait, a callback-driven capability with the same shape
//! as the WMS service of a QMI modem: open/close the device, allocate/release
//! a client, then list, raw-read and delete stored messages through that
//! client.
//!
//! Every request takes a [`Completion`] that the implementation invokes
//! exactly once, from any thread, with either a success payload or a
//! [`TransportError`]. Timeouts are reported as [`TransportError::Timeout`]
//! so callers can tell them apart from permanent failures.
//!
//! ## Implementations
//!
//! - [`spool::SpoolTransport`] - a directory-backed message store fed by an
//!   external modem daemon; used by the `smsrelay` binary.
//! - [`memory::MemoryTransport`] - a scripted in-memory store with fault
//!   injection, used by the test suite.
//!
//! Callers should not invoke these methods directly; the
//! [`bridge`](crate::bridge) module turns them into awaited calls.

pub mod memory;
pub mod spool;

use crate::error::TransportError;
use std::fmt;

/// One-shot completion callback for an asynchronous transport request.
pub type Completion<T> = Box<dyn FnOnce(Result<T, TransportError>) + Send + 'static>;

/// Opaque identifier of an opened device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(pub u32);

/// Opaque identifier of an allocated message-service client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub u32);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client#{}", self.0)
    }
}

/// Storage class of the message store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    /// SIM/UIM card store.
    Uim,
    /// Modem non-volatile store.
    Nv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageMode {
    Cdma,
    GsmWcdma,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageTag {
    MtRead,
    MtNotRead,
    MoSent,
    MoNotSent,
}

/// Filter for a list request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListRequest {
    pub storage: StorageType,
    pub mode: MessageMode,
    pub tag: MessageTag,
}

impl ListRequest {
    /// Unread mobile-terminated GSM/WCDMA messages on the SIM. This is the
    /// only filter the orchestrator issues.
    pub fn unread_sim() -> Self {
        Self {
            storage: StorageType::Uim,
            mode: MessageMode::GsmWcdma,
            tag: MessageTag::MtNotRead,
        }
    }
}

/// Raw read of one stored message. Resubmitted unmodified on timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawReadRequest {
    pub storage: StorageType,
    pub index: u32,
    pub mode: MessageMode,
}

impl RawReadRequest {
    pub fn sim(index: u32) -> Self {
        Self {
            storage: StorageType::Uim,
            index,
            mode: MessageMode::GsmWcdma,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteRequest {
    pub storage: StorageType,
    pub index: u32,
    pub mode: MessageMode,
}

impl DeleteRequest {
    pub fn sim(index: u32) -> Self {
        Self {
            storage: StorageType::Uim,
            index,
            mode: MessageMode::GsmWcdma,
        }
    }
}

/// Asynchronous, callback-driven access to a modem's message service.
///
/// A single client is single-flight: callers must not issue a second request
/// on the same client before the previous completion fired.
pub trait ModemTransport: Send + Sync + 'static {
    fn open(&self, path: &str, done: Completion<DeviceId>);

    fn close(&self, device: DeviceId, done: Completion<()>);

    fn allocate_client(&self, device: DeviceId, done: Completion<ClientId>);

    fn release_client(&self, device: DeviceId, client: ClientId, done: Completion<()>);

    /// List storage handles matching `request`.
    fn list_messages(&self, client: ClientId, request: ListRequest, done: Completion<Vec<u32>>);

    /// Fetch the undecoded bytes stored at `request.index`.
    fn raw_read(&self, client: ClientId, request: RawReadRequest, done: Completion<Vec<u8>>);

    fn delete(&self, client: ClientId, request: DeleteRequest, done: Completion<()>);
}
