//! Walfence: lease-based exclusive locking for partitioned write-ahead logs.
//!
//! Guarantees at most one active writer per `(log_root, topic,
//! partition)` when independent processes share a hierarchical store
//! that offers no locking primitive — only atomic `create`, `list`,
//! `rename`, and `delete`. The whole protocol is built out of those:
//! lock state is a single timestamp-named marker entry, renewal is a
//! rename to a fresh name, and fail-if-destination-exists rename is
//! the compare-and-swap that decides every race.
//!
//! ```no_run
//! use std::sync::Arc;
//! use walfence::{FsStorage, WalLock};
//!
//! let storage = Arc::new(FsStorage::new("/mnt/shared"));
//! let lock = WalLock::acquire("/logs", "mytopic", 123, storage)?;
//!
//! // Exclusive writes to the partition's WAL, heartbeat renewing in
//! // the background. An explicit renew before a critical append:
//! lock.renew()?;
//! # Ok::<(), walfence::WalError>(())
//! ```
//!
//! Leases expire on wall-clock time alone: a crashed owner's marker
//! goes stale after `lease_timeout` and any peer may take over. There
//! is no fencing token beyond the marker timestamp, so bounded clock
//! skew between processes is assumed, not enforced — see
//! [`WalLock`](lease::WalLock) for the fine print.

pub mod diag;
pub mod error;
pub mod lease;
pub mod storage;

pub use error::{Result, WalError};
pub use lease::{LeaseOptions, WalLock};
pub use storage::{FsStorage, MemoryStorage, Storage, StorageError};
