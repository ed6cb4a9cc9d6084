//! Local/shared filesystem storage backend.
//!
//! All four primitive operations map onto syscalls that POSIX makes
//! atomic at single-path granularity:
//!
//! - `create` uses exclusive create (`create_new`), so exactly one of
//!   any number of concurrent creators wins.
//! - `rename` is implemented as hard-link-then-unlink rather than
//!   `std::fs::rename`: a plain rename on POSIX silently replaces an
//!   existing destination, while `link(2)` fails with `EEXIST`, which
//!   is the fail-if-destination-exists contract the trait requires.
//!   The source unlink afterwards is cleanup; a lister can
//!   catch the moment both entries exist, and a crash between the two
//!   calls leaves both behind, so the lock protocol treats a marker
//!   pair as a single lease judged by its newer half and clears the
//!   leftover at the next takeover.
//!
//! Every call runs on a short-lived I/O thread and is bounded by a
//! per-call deadline (`with_call_timeout`), surfaced as
//! [`StorageError::Timeout`](super::StorageError::Timeout): a hung
//! mount must not wedge a renewal or a close. A call that times out is
//! abandoned rather than cancelled; the syscall itself cannot be
//! interrupted, so its thread is left to finish (or hang) on its own.

use super::backend::{Entry, Storage, StorageError, StorageResult};
use chrono::{DateTime, Utc};
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// Default per-call deadline. Generous for a healthy filesystem; a
/// call that takes longer than this is a stuck mount, not a slow disk.
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Filesystem-backed [`Storage`] rooted at a base directory.
///
/// Storage paths like `logs/mytopic/123/lock_17000` resolve to
/// `<root>/logs/mytopic/123/lock_17000`; a leading `/` in the storage
/// path is ignored so both spellings address the same entry.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
    call_timeout: Duration,
}

impl FsStorage {
    /// Create a backend rooted at `root` with the default per-call
    /// deadline. The directory itself is created lazily, on the first
    /// `create` beneath it.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_call_timeout(root, DEFAULT_CALL_TIMEOUT)
    }

    /// Create a backend with an explicit per-call deadline.
    pub fn with_call_timeout(root: impl Into<PathBuf>, call_timeout: Duration) -> Self {
        Self {
            root: root.into(),
            call_timeout,
        }
    }

    /// Root directory of this backend.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

fn map_io(path: &Path, e: std::io::Error) -> StorageError {
    let detail = format!("{}: {}", path.display(), e);
    match e.kind() {
        ErrorKind::AlreadyExists => StorageError::AlreadyExists(detail),
        ErrorKind::NotFound => StorageError::NotFound(detail),
        ErrorKind::TimedOut => StorageError::Timeout(detail),
        _ => StorageError::Io(detail),
    }
}

/// Sync a directory so a just-created or just-renamed entry survives a
/// crash. Failures are ignored: durability of the directory entry is
/// best-effort, correctness comes from atomicity.
fn sync_dir(dir: &Path) {
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}

/// Run `op` on its own thread, giving up after `timeout`.
///
/// An abandoned worker keeps running until its syscall returns; there
/// is no way to cancel it. That leaks one blocked thread per timed-out
/// call against a dead mount, which is the acceptable cost of letting
/// renew/close return.
fn bounded<T, F>(what: String, timeout: Duration, op: F) -> StorageResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> StorageResult<T> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("walfence-fs-io".to_string())
        .spawn(move || {
            let _ = tx.send(op());
        })
        .map_err(|e| StorageError::Io(format!("{}: spawning i/o thread: {}", what, e)))?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => Err(StorageError::Timeout(format!(
            "{} did not complete within {:?}",
            what, timeout
        ))),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(StorageError::Io(format!(
            "{}: i/o thread terminated abnormally",
            what
        ))),
    }
}

fn create_at(target: PathBuf) -> StorageResult<()> {
    if let Some(parent) = target.parent()
        && !parent.exists()
    {
        fs::create_dir_all(parent).map_err(|e| map_io(parent, e))?;
    }

    // Exclusive create: loses cleanly if another process got here first.
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&target)
        .map_err(|e| map_io(&target, e))?;
    file.sync_all().map_err(|e| map_io(&target, e))?;

    if let Some(parent) = target.parent() {
        sync_dir(parent);
    }
    Ok(())
}

fn list_dir(target: PathBuf) -> StorageResult<Vec<Entry>> {
    let read = match fs::read_dir(&target) {
        Ok(read) => read,
        // A directory that was never created is an empty listing,
        // not an error: first acquisition for a partition sees it.
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(map_io(&target, e)),
    };

    let mut entries = Vec::new();
    for item in read {
        let item = item.map_err(|e| map_io(&target, e))?;
        let file_type = item.file_type().map_err(|e| map_io(&item.path(), e))?;
        if file_type.is_dir() {
            continue;
        }

        let name = item.file_name().to_string_lossy().into_owned();
        let last_modified = item
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .map(DateTime::<Utc>::from);
        entries.push(Entry {
            name,
            last_modified,
        });
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

fn rename_paths(source: PathBuf, target: PathBuf) -> StorageResult<()> {
    // link(2) fails with EEXIST if the destination exists and with
    // ENOENT if the source is gone; both are exactly the
    // compare-and-swap outcomes the protocol needs.
    fs::hard_link(&source, &target).map_err(|e| match e.kind() {
        ErrorKind::NotFound => map_io(&source, e),
        _ => map_io(&target, e),
    })?;
    fs::remove_file(&source).map_err(|e| map_io(&source, e))?;

    if let Some(parent) = target.parent() {
        sync_dir(parent);
    }
    Ok(())
}

fn delete_at(target: PathBuf) -> StorageResult<()> {
    fs::remove_file(&target).map_err(|e| map_io(&target, e))
}

impl Storage for FsStorage {
    fn create(&self, path: &str) -> StorageResult<()> {
        let target = self.resolve(path);
        let what = format!("create {}", target.display());
        bounded(what, self.call_timeout, move || create_at(target))
    }

    fn list(&self, dir: &str) -> StorageResult<Vec<Entry>> {
        let target = self.resolve(dir);
        let what = format!("list {}", target.display());
        bounded(what, self.call_timeout, move || list_dir(target))
    }

    fn rename(&self, old: &str, new: &str) -> StorageResult<()> {
        let source = self.resolve(old);
        let target = self.resolve(new);
        let what = format!("rename {} -> {}", source.display(), target.display());
        bounded(what, self.call_timeout, move || {
            rename_paths(source, target)
        })
    }

    fn delete(&self, path: &str) -> StorageResult<()> {
        let target = self.resolve(path);
        let what = format!("delete {}", target.display());
        bounded(what, self.call_timeout, move || delete_at(target))
    }
}
