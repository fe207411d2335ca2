//! Session Handle Manager: device lifetime and client allocation.

use crate::bridge::{await_completion, with_timeout_retry, RetryPolicy};
use crate::error::{SmsError, TransportError};
use crate::metrics;
use crate::transport::{ClientId, DeviceId, ModemTransport};
use log::{debug, info, warn};
use std::sync::{Arc, Mutex};

/// Whether a session spans the polling loop or a single one-shot call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Persistent,
    Transient,
}

/// A live client handle together with its ownership flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionHandle {
    pub client: ClientId,
    pub kind: SessionKind,
}

impl SessionHandle {
    pub fn is_transient(&self) -> bool {
        self.kind == SessionKind::Transient
    }
}

/// Owns the device handle and creates/destroys client handles on it.
pub struct SessionManager {
    transport: Arc<dyn ModemTransport>,
    device: Mutex<Option<DeviceId>>,
    allocation: RetryPolicy,
}

impl SessionManager {
    pub fn new(transport: Arc<dyn ModemTransport>, allocation: RetryPolicy) -> Self {
        Self {
            transport,
            device: Mutex::new(None),
            allocation,
        }
    }

    /// Open the device once; later calls reuse the open handle.
    pub async fn open_device(&self, path: &str) -> Result<DeviceId, SmsError> {
        if let Ok(device) = self.device() {
            return Ok(device);
        }
        let transport = self.transport.clone();
        let device = await_completion(|done| transport.open(path, done))
            .await
            .map_err(|source| SmsError::DeviceUnavailable {
                path: path.to_string(),
                source,
            })?;
        info!("Opened modem device {}", path);
        let mut slot = self.device.lock().unwrap_or_else(|p| p.into_inner());
        Ok(*slot.get_or_insert(device))
    }

    pub fn device(&self) -> Result<DeviceId, SmsError> {
        let device = *self.device.lock().unwrap_or_else(|p| p.into_inner());
        device.ok_or(SmsError::DeviceNotOpen)
    }

    /// Allocate a client, re-issuing the whole request while the transport
    /// reports timeouts and the allocation policy allows it.
    pub async fn acquire_client(&self) -> Result<ClientId, SmsError> {
        let device = self.device()?;
        let (result, attempts) = with_timeout_retry(&self.allocation, "client allocation", || {
            let transport = self.transport.clone();
            await_completion(move |done| transport.allocate_client(device, done))
        })
        .await;
        if attempts > 1 {
            metrics::add_allocation_retries(u64::from(attempts - 1));
        }
        match result {
            Ok(client) => {
                debug!("Allocated {} after {} attempt(s)", client, attempts);
                Ok(client)
            }
            Err(source) => {
                warn!("Unable to allocate message client: {}", source);
                Err(SmsError::ClientAllocationFailed { attempts, source })
            }
        }
    }

    /// Release a client. Failures are logged and swallowed so shutdown is
    /// never blocked by a misbehaving modem.
    pub async fn release_client(&self, client: ClientId) {
        let device = match self.device() {
            Ok(device) => device,
            Err(_) => {
                debug!("Device already closed; dropping {}", client);
                return;
            }
        };
        let transport = self.transport.clone();
        match await_completion(|done| transport.release_client(device, client, done)).await {
            Ok(()) => debug!("Released {}", client),
            Err(e) => warn!("Failed to release {}: {}", client, e),
        }
    }

    /// Close the device and wait for the acknowledgement. Best-effort.
    pub async fn close_device(&self) {
        let device = self
            .device
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        let Some(device) = device else {
            return;
        };
        let transport = self.transport.clone();
        match await_completion(|done| transport.close(device, done)).await {
            Ok(()) => info!("Modem device closed"),
            Err(TransportError::Timeout) => warn!("Timed out closing modem device"),
            Err(e) => warn!("Failed to close modem device: {}", e),
        }
    }
}
