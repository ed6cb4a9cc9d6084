//! The storage backend trait and its error type.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// A single entry in a storage directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Entry name, without any directory prefix.
    pub name: String,

    /// Backend's last-modified hint, if it has one.
    ///
    /// This is a hint only: the lock protocol derives all timing from
    /// the timestamp encoded in the marker name, never from backend
    /// metadata, so differently-configured backends interoperate.
    pub last_modified: Option<DateTime<Utc>>,
}

/// Errors surfaced by storage backends.
///
/// These never reach lock callers; the lease layer maps them to its
/// own error kinds.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The destination path already exists (`create` or `rename`).
    #[error("destination already exists: {0}")]
    AlreadyExists(String),

    /// The source path does not exist (`rename` or `delete`).
    #[error("path not found: {0}")]
    NotFound(String),

    /// The backend did not answer within its per-call deadline.
    #[error("storage call timed out: {0}")]
    Timeout(String),

    /// Any other I/O failure.
    #[error("storage i/o error: {0}")]
    Io(String),
}

impl StorageError {
    /// Whether the failure is transient and the call may be worth
    /// repeating. `AlreadyExists`/`NotFound` are definitive answers
    /// about the state of the store, not failures to reach it.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Timeout(_) | StorageError::Io(_))
    }
}

/// Result type alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// A hierarchical store with atomic single-path operations.
///
/// Paths are plain `/`-separated strings; backends decide how they map
/// to real locations. Implementations must uphold:
///
/// - `create` fails with [`StorageError::AlreadyExists`] if the path
///   already exists, atomically (no window where two creators both
///   succeed).
/// - `rename` fails with [`StorageError::AlreadyExists`] if the
///   destination exists and [`StorageError::NotFound`] if the source
///   does not, atomically. It must never silently replace the
///   destination — the protocol relies on the failure as a
///   compare-and-swap.
/// - `list` returns entries ordered by name, and an empty listing (not
///   an error) for a directory that does not exist yet.
///
/// Backends own their per-call deadlines: a call that would block
/// indefinitely should be bounded and surfaced as
/// [`StorageError::Timeout`] so a slow store never wedges a caller.
pub trait Storage: Send + Sync {
    /// Create an empty entry at `path`, failing if it exists.
    fn create(&self, path: &str) -> StorageResult<()>;

    /// List the entries directly under `dir`, ordered by name.
    fn list(&self, dir: &str) -> StorageResult<Vec<Entry>>;

    /// Atomically rename `old` to `new`, failing if `new` exists or
    /// `old` does not.
    fn rename(&self, old: &str, new: &str) -> StorageResult<()>;

    /// Delete the entry at `path`.
    fn delete(&self, path: &str) -> StorageResult<()>;
}
