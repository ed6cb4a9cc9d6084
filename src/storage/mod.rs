//! Storage abstraction consumed by the lock protocol.
//!
//! The lock never talks to a concrete backend directly; it is written
//! against the [`Storage`] trait, which models a hierarchical store
//! offering exactly four operations — `create`, `list`, `rename`,
//! `delete` — each atomic at single-path granularity. `create` and
//! `rename` fail if the destination already exists; that failure mode
//! is what the protocol uses as its compare-and-swap.
//!
//! Two backends ship with the crate:
//! - [`FsStorage`]: a local/shared filesystem rooted at a directory.
//! - [`MemoryStorage`]: an in-process map, used by tests that need to
//!   inject races and failures deterministically.

mod backend;
mod fs;
mod memory;

pub use backend::{Entry, Storage, StorageError, StorageResult};
pub use fs::FsStorage;
pub use memory::MemoryStorage;
