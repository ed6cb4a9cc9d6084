//! Error types for the walfence crate.
//!
//! Uses thiserror for derive macros. Every error kind carries a
//! human-readable description of what went wrong; backend-specific
//! error types never appear here (the lease layer maps them before
//! they reach callers).

use thiserror::Error;

/// Main error type for lock operations.
///
/// The kinds are deliberately coarse: callers decide what to do based
/// on the kind alone (retry later, tear down the writer, page someone),
/// and the message carries the detail.
#[derive(Error, Debug)]
pub enum WalError {
    /// Another instance holds a live lease, or a takeover lost its race.
    /// Not retried automatically; the caller may retry after a delay.
    #[error("lock conflict: {0}")]
    LockConflict(String),

    /// The lease went past its timeout before it could be renewed.
    /// Fatal to the instance: construct a fresh one to reacquire.
    #[error("lease expired: {0}")]
    LeaseExpired(String),

    /// Transient storage backend failure (timeout, connectivity).
    #[error("storage failure: {0}")]
    StorageIo(String),

    /// More lock markers observed for a single partition than the
    /// protocol can ever produce, or an unparsable marker name.
    /// Some external actor violated the protocol; never retried.
    #[error("lock protocol corruption: {0}")]
    ProtocolCorruption(String),

    /// Lease durations that cannot work (e.g. timeout not above the
    /// renewal interval, which would self-expire under normal cadence).
    #[error("invalid lease options: {0}")]
    InvalidOptions(String),

    /// Serializing diagnostic output failed. A local bug, not a
    /// storage problem; retrying the same value cannot succeed.
    #[error("encoding failure: {0}")]
    Encoding(String),
}

impl WalError {
    /// Whether the operation may be retried as-is.
    ///
    /// Only transient storage failures qualify. A conflict or expiry
    /// means the world changed; retrying requires re-reading state
    /// through a fresh acquisition.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WalError::StorageIo(_))
    }
}

/// Result type alias for lock operations.
pub type Result<T> = std::result::Result<T, WalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_storage_errors_are_retryable() {
        assert!(WalError::StorageIo("timeout".to_string()).is_retryable());
        assert!(!WalError::LockConflict("held".to_string()).is_retryable());
        assert!(!WalError::LeaseExpired("old".to_string()).is_retryable());
        assert!(!WalError::ProtocolCorruption("two markers".to_string()).is_retryable());
        assert!(!WalError::InvalidOptions("bad".to_string()).is_retryable());
        assert!(!WalError::Encoding("bad value".to_string()).is_retryable());
    }

    #[test]
    fn error_messages_are_descriptive() {
        let err = WalError::LockConflict("marker renewed 3s ago".to_string());
        assert_eq!(err.to_string(), "lock conflict: marker renewed 3s ago");

        let err = WalError::ProtocolCorruption("2 markers in logs/t/0".to_string());
        assert_eq!(
            err.to_string(),
            "lock protocol corruption: 2 markers in logs/t/0"
        );
    }
}
