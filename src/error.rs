use thiserror::Error;

/// Failure reported by a transport completion.
///
/// `Timeout` is the only condition the orchestrator treats as retryable; it is
/// kept distinct so a slow modem is never mistaken for a permanent failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("transaction timed out")]
    Timeout,

    #[error("{0}")]
    Failed(String),

    /// The completion was dropped without ever being invoked.
    #[error("completion dropped before the transport reported a result")]
    Dropped,
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout)
    }
}

/// Errors returned by a [`MessageDecoder`](crate::decoder::MessageDecoder).
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("empty message body")]
    Empty,

    #[error("malformed record: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid concatenation header: part {part} of {total}")]
    InvalidConcat { part: u8, total: u8 },
}

/// Errors surfaced to callers of the orchestrator.
///
/// Only failures that prevent obtaining a usable session or handle list end
/// up here. Per-message fetch and decode problems are absorbed by the batch
/// pipeline and show up as omissions instead.
#[derive(Debug, Error)]
pub enum SmsError {
    #[error("device {path} unavailable: {source}")]
    DeviceUnavailable {
        path: String,
        #[source]
        source: TransportError,
    },

    #[error("device is not open")]
    DeviceNotOpen,

    #[error("client allocation failed after {attempts} attempt(s): {source}")]
    ClientAllocationFailed {
        attempts: u32,
        #[source]
        source: TransportError,
    },

    #[error("listing stored messages failed: {0}")]
    EnumerationFailed(#[source] TransportError),

    #[error("reading message {handle} failed after {attempts} attempt(s): {source}")]
    FetchFailed {
        handle: u32,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    #[error("deleting message {handle} failed: {source}")]
    DeleteFailed {
        handle: u32,
        #[source]
        source: TransportError,
    },

    #[error("polling interval must be greater than zero")]
    InvalidInterval,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_the_only_retryable_condition() {
        assert!(TransportError::Timeout.is_timeout());
        assert!(!TransportError::Failed("busy".into()).is_timeout());
        assert!(!TransportError::Dropped.is_timeout());
    }

    #[test]
    fn allocation_failure_reports_attempts() {
        let err = SmsError::ClientAllocationFailed {
            attempts: 4,
            source: TransportError::Timeout,
        };
        assert_eq!(
            err.to_string(),
            "client allocation failed after 4 attempt(s): transaction timed out"
        );
    }
}
