//! Lease-based exclusive lock over atomic storage.
//!
//! This module implements the single-owner mutual exclusion protocol
//! that lets independent processes share one write-ahead log per
//! partition without a native locking primitive in the store:
//!
//! - Lock state is one **marker** entry under
//!   `<log_root>/<topic>/<partition>/`, named with the timestamp of
//!   its latest renewal. One marker = locked, none = unlocked.
//! - The owner **renews** by renaming the marker to a new
//!   timestamp-bearing name on a fixed cadence; rename-fails-if-exists
//!   is the compare-and-swap that keeps two processes from both
//!   believing they own the lease.
//! - A marker older than the lease timeout is **stale**: its owner is
//!   no longer in good standing and any process may take over, again
//!   via compare-and-swap rename.
//! - Nothing deletes the marker on close or crash; staleness alone
//!   signals availability to the next acquirer.
//!
//! # Lifecycle
//!
//! [`WalLock::acquire`] performs one acquisition attempt and, on
//! success, starts a background heartbeat that renews every
//! `renewal_interval`. Callers may [`WalLock::renew`] explicitly at any
//! time and must [`WalLock::close`] when done (dropping the lock closes
//! it too). A lock that observes its own lease expired is dead for
//! good; reacquisition means constructing a fresh instance.

mod heartbeat;
mod lock;
pub(crate) mod marker;
mod options;


pub use lock::WalLock;
pub use marker::{marker_name, parse_marker_name};
pub use options::LeaseOptions;
