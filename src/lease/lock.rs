//! The lock state machine: acquisition, renewal, takeover, close.

use super::heartbeat::Heartbeat;
use super::marker::{self, marker_name, parse_marker_name};
use super::options::LeaseOptions;
use crate::error::{Result, WalError};
use crate::storage::{Storage, StorageError};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// How many times a transient listing failure is retried before the
/// acquisition gives up. Listing is idempotent; the compare-and-swap
/// rename never is, so it gets no such treatment.
const LIST_ATTEMPTS: u32 = 3;
const LIST_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Mutable lease state, shared between the owning [`WalLock`] and its
/// heartbeat thread. One mutex guards all of it so a scheduled renewal
/// and a caller's explicit renew/close serialize.
pub(crate) struct LeaseState {
    /// Name of the marker we last wrote. The compare half of every
    /// compare-and-swap rename.
    pub(crate) marker_name: String,

    /// Wall-clock time (epoch millis) of the last successful renewal.
    pub(crate) last_renewed_at_ms: i64,

    /// Set once a renewal observes the lease past its timeout or loses
    /// a rename race. Never cleared: an expired instance stays dead.
    pub(crate) expired: bool,
}

/// Exclusive, lease-based lock on one partition's write-ahead log.
///
/// At most one live instance per `(log_root, topic, partition)` across
/// all processes sharing the storage backend, as long as every process
/// plays by the marker protocol (see the [module docs](super)).
///
/// Fencing here is purely time-based: there is no fencing token beyond
/// the timestamp in the marker name, and bounded clock skew between
/// processes is assumed rather than enforced. A process whose clock
/// pauses or drifts far enough can believe it still owns a lease a
/// peer has legitimately taken over. That is a known weak point of the
/// protocol, inherited from its on-disk contract.
pub struct WalLock {
    dir: String,
    topic: String,
    partition: u32,
    options: LeaseOptions,
    storage: Arc<dyn Storage>,
    owner: String,
    state: Arc<Mutex<LeaseState>>,

    /// `Some` while held, taken by `close`. Emptiness doubles as the
    /// closed flag.
    heartbeat: Option<Heartbeat>,
}

impl WalLock {
    /// Acquire the lock for `<log_root>/<topic>/<partition>` with
    /// default lease timings.
    ///
    /// This is construction-as-acquisition: on success the returned
    /// lock is live and its heartbeat is already running; on failure
    /// nothing was mutated (except a lost-race marker belonging to the
    /// winner) and no instance exists.
    pub fn acquire(
        log_root: &str,
        topic: &str,
        partition: u32,
        storage: Arc<dyn Storage>,
    ) -> Result<Self> {
        Self::acquire_with(log_root, topic, partition, storage, LeaseOptions::default())
    }

    /// Acquire with explicit lease timings.
    ///
    /// # Errors
    ///
    /// * [`WalError::LockConflict`] — another instance holds a live
    ///   lease, or our takeover of a stale marker lost its race. A
    ///   marker pair counts as one lease judged by its newer half: a
    ///   link-then-unlink rename caught mid-flight (or cut short by a
    ///   crash) leaves exactly two markers, and that must not wedge
    ///   the partition.
    /// * [`WalError::ProtocolCorruption`] — three or more markers, or
    ///   an unparsable marker name, in the partition directory.
    /// * [`WalError::StorageIo`] — backend failure after retries.
    /// * [`WalError::InvalidOptions`] — unworkable lease timings.
    pub fn acquire_with(
        log_root: &str,
        topic: &str,
        partition: u32,
        storage: Arc<dyn Storage>,
        options: LeaseOptions,
    ) -> Result<Self> {
        options.validate()?;

        let dir = format!("{}/{}/{}", log_root.trim_end_matches('/'), topic, partition);
        let owner = owner_string();

        let markers = list_markers(storage.as_ref(), &dir)?;
        let now = Utc::now().timestamp_millis();
        let name = marker_name(now);

        match markers.as_slice() {
            // Unlocked: claim it with an exclusive create.
            [] => {
                storage.create(&entry_path(&dir, &name)).map_err(|e| match e {
                    StorageError::AlreadyExists(_) => WalError::LockConflict(format!(
                        "lost the creation race for {}: {}",
                        dir, e
                    )),
                    e => WalError::StorageIo(format!("creating marker in {}: {}", dir, e)),
                })?;
                tracing::debug!(dir = %dir, owner = %owner, marker = %name, "acquired wal lock");
            }

            // One marker: live lease -> conflict; stale lease -> take over.
            [(existing, renewed_at_ms)] => {
                let age_ms = now - renewed_at_ms;
                if age_ms < options.lease_timeout_ms as i64 {
                    return Err(WalError::LockConflict(format!(
                        "{} is held by a live lease (marker {} renewed {}ms ago, timeout {}ms)",
                        dir, existing, age_ms, options.lease_timeout_ms
                    )));
                }

                take_over(storage.as_ref(), &dir, existing, &name)?;
                tracing::info!(
                    dir = %dir,
                    owner = %owner,
                    stale_marker = %existing,
                    stale_age_ms = age_ms,
                    "took over expired wal lock"
                );
            }

            // A marker pair is the footprint of a rename built from
            // link-then-unlink: either a renewal caught mid-flight, or
            // an owner that crashed between the two calls. Judge the
            // lease by the newer marker; the older one is a leftover.
            [(older, _), (newer, newer_ts)] => {
                let age_ms = now - newer_ts;
                if age_ms < options.lease_timeout_ms as i64 {
                    return Err(WalError::LockConflict(format!(
                        "{} is held by a live lease (marker {} renewed {}ms ago, timeout {}ms; \
                         leftover {} pending cleanup)",
                        dir, newer, age_ms, options.lease_timeout_ms, older
                    )));
                }

                // Both stale: the owner died mid-rename. Clear the
                // leftover, then take over the surviving marker under
                // compare-and-swap as usual.
                match storage.delete(&entry_path(&dir, older)) {
                    Ok(()) | Err(StorageError::NotFound(_)) => {}
                    Err(e) => {
                        return Err(WalError::StorageIo(format!(
                            "clearing leftover marker {} in {}: {}",
                            older, dir, e
                        )));
                    }
                }
                take_over(storage.as_ref(), &dir, newer, &name)?;
                tracing::info!(
                    dir = %dir,
                    owner = %owner,
                    stale_marker = %newer,
                    leftover_marker = %older,
                    stale_age_ms = age_ms,
                    "took over expired wal lock, clearing a mid-rename leftover"
                );
            }

            _ => {
                return Err(WalError::ProtocolCorruption(format!(
                    "{} markers in {}, expected at most one",
                    markers.len(),
                    dir
                )));
            }
        }

        let state = Arc::new(Mutex::new(LeaseState {
            marker_name: name.clone(),
            last_renewed_at_ms: now,
            expired: false,
        }));

        let heartbeat = match Heartbeat::start(
            Arc::clone(&storage),
            dir.clone(),
            options,
            Arc::clone(&state),
            owner.clone(),
        ) {
            Ok(heartbeat) => heartbeat,
            Err(e) => {
                // Without a renewer the fresh marker would block peers
                // for a full lease timeout; free them now.
                discard_marker(storage.as_ref(), &dir, &name);
                return Err(WalError::StorageIo(format!(
                    "starting heartbeat for {}: {}",
                    dir, e
                )));
            }
        };

        Ok(Self {
            dir,
            topic: topic.to_string(),
            partition,
            options,
            storage,
            owner,
            state,
            heartbeat: Some(heartbeat),
        })
    }

    /// Renew the lease now, independent of the background heartbeat.
    ///
    /// Steady-state renewal is silent. Once the lease is past its
    /// timeout — whether discovered here or by the heartbeat — this
    /// fails with [`WalError::LeaseExpired`] and keeps failing: a lapsed
    /// owner must not resurrect itself, because any peer is already
    /// entitled to take over. Closing the lock does not change what
    /// this returns; it just stops the automatic renewals.
    pub fn renew(&self) -> Result<()> {
        let mut state = lock_state(&self.state);
        renew_under_lock(self.storage.as_ref(), &self.dir, &self.options, &mut state)
    }

    /// Stop the heartbeat and mark the lock closed. Idempotent.
    ///
    /// Blocks until the heartbeat thread is gone, so no renewal can
    /// complete after this returns. The marker is deliberately left in
    /// place: letting it go stale is how the next acquirer learns the
    /// partition is free, and it is also all a crashed owner would
    /// leave behind.
    pub fn close(&mut self) {
        let Some(heartbeat) = self.heartbeat.take() else {
            return;
        };
        heartbeat.stop();
        tracing::debug!(dir = %self.dir, owner = %self.owner, "closed wal lock");
    }

    /// Storage directory holding this lock's marker.
    pub fn partition_dir(&self) -> &str {
        &self.dir
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> u32 {
        self.partition
    }

    pub fn options(&self) -> &LeaseOptions {
        &self.options
    }

    /// Owner identity (`user@HOST`) recorded in log events.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Whether `close` has run.
    pub fn is_closed(&self) -> bool {
        self.heartbeat.is_none()
    }

    /// Whether this instance has observed its own lease expire or lose
    /// a race. Once true, stays true.
    pub fn is_expired(&self) -> bool {
        lock_state(&self.state).expired
    }

    /// Wall-clock time of the most recent successful renewal.
    pub fn last_renewed_at(&self) -> DateTime<Utc> {
        let ms = lock_state(&self.state).last_renewed_at_ms;
        DateTime::from_timestamp_millis(ms).unwrap_or_default()
    }
}

impl Drop for WalLock {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for WalLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalLock")
            .field("dir", &self.dir)
            .field("owner", &self.owner)
            .field("options", &self.options)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Renewal logic shared by explicit calls and heartbeat ticks; the
/// caller holds the state mutex.
pub(crate) fn renew_under_lock(
    storage: &dyn Storage,
    dir: &str,
    options: &LeaseOptions,
    state: &mut LeaseState,
) -> Result<()> {
    if state.expired {
        return Err(WalError::LeaseExpired(format!(
            "lease for {} already expired; reacquire with a new instance",
            dir
        )));
    }

    let now = Utc::now().timestamp_millis();
    let age_ms = now - state.last_renewed_at_ms;
    if age_ms >= options.lease_timeout_ms as i64 {
        state.expired = true;
        return Err(WalError::LeaseExpired(format!(
            "lease for {} went {}ms without renewal (timeout {}ms); any peer may take over",
            dir, age_ms, options.lease_timeout_ms
        )));
    }

    let new_name = marker_name(now);
    if new_name == state.marker_name {
        // Two renewals in the same millisecond; the marker already
        // carries this timestamp.
        return Ok(());
    }

    storage
        .rename(
            &entry_path(dir, &state.marker_name),
            &entry_path(dir, &new_name),
        )
        .map_err(|e| match e {
            // Our marker is gone or shadowed: a peer judged the lease
            // stale and took over. Ownership is lost for good.
            StorageError::AlreadyExists(_) | StorageError::NotFound(_) => {
                state.expired = true;
                WalError::LeaseExpired(format!(
                    "marker for {} was replaced by a peer ({}); ownership lost",
                    dir, e
                ))
            }
            e => WalError::StorageIo(format!("renewing lease for {}: {}", dir, e)),
        })?;

    state.marker_name = new_name;
    state.last_renewed_at_ms = now;
    Ok(())
}

/// Lock the lease state, recovering from a poisoned mutex: the state
/// is a couple of scalars that are always left consistent.
pub(crate) fn lock_state(state: &Mutex<LeaseState>) -> MutexGuard<'_, LeaseState> {
    state.lock().unwrap_or_else(|poison| poison.into_inner())
}

fn entry_path(dir: &str, name: &str) -> String {
    format!("{}/{}", dir, name)
}

/// Compare-and-swap takeover of a stale marker. The rename fails if
/// the marker was concurrently renewed (source gone) or a third party
/// already took over (destination exists); either way we lost.
fn take_over(storage: &dyn Storage, dir: &str, stale_name: &str, new_name: &str) -> Result<()> {
    storage
        .rename(&entry_path(dir, stale_name), &entry_path(dir, new_name))
        .map_err(|e| match e {
            StorageError::AlreadyExists(_) | StorageError::NotFound(_) => {
                WalError::LockConflict(format!(
                    "takeover of stale marker {} in {} lost its race: {}",
                    stale_name, dir, e
                ))
            }
            e => WalError::StorageIo(format!("taking over {}: {}", dir, e)),
        })
}

/// Best-effort removal of a marker this instance wrote but cannot
/// renew. An already-missing marker is fine; anything else is logged
/// and otherwise ignored, since the caller is already failing.
pub(crate) fn discard_marker(storage: &dyn Storage, dir: &str, name: &str) {
    match storage.delete(&entry_path(dir, name)) {
        Ok(()) | Err(StorageError::NotFound(_)) => {}
        Err(e) => {
            tracing::warn!(dir = %dir, marker = %name, error = %e, "failed to remove unrenewable marker");
        }
    }
}

/// List the marker entries in a partition directory, ordered oldest
/// renewal first.
///
/// Transient backend failures are retried with a short linear backoff;
/// the other entries a WAL directory holds (the log itself) are
/// ignored; a marker-prefixed name that does not parse is corruption.
fn list_markers(storage: &dyn Storage, dir: &str) -> Result<Vec<(String, i64)>> {
    let mut attempt = 1;
    let entries = loop {
        match storage.list(dir) {
            Ok(entries) => break entries,
            Err(e) if e.is_transient() && attempt < LIST_ATTEMPTS => {
                tracing::debug!(dir = %dir, attempt, error = %e, "retrying lock marker listing");
                std::thread::sleep(LIST_RETRY_DELAY * attempt);
                attempt += 1;
            }
            Err(e) => return Err(WalError::StorageIo(format!("listing {}: {}", dir, e))),
        }
    };

    let mut markers = Vec::new();
    for entry in entries {
        if !marker::is_marker_name(&entry.name) {
            continue;
        }
        match parse_marker_name(&entry.name) {
            Some(renewed_at_ms) => markers.push((entry.name, renewed_at_ms)),
            None => {
                return Err(WalError::ProtocolCorruption(format!(
                    "unparsable marker name '{}' in {}",
                    entry.name, dir
                )));
            }
        }
    }

    // Name order is lexical; renewal order is numeric.
    markers.sort_by_key(|(_, renewed_at_ms)| *renewed_at_ms);
    Ok(markers)
}

/// Owner string for log events (e.g. `user@HOST`).
fn owner_string() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());

    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    format!("{}@{}", user, host)
}
