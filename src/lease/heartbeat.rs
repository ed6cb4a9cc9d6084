//! Background lease renewal.
//!
//! One thread per held lock, started the moment acquisition succeeds.
//! Cancellation is a flag + condvar pair: `stop` raises the flag,
//! wakes the thread, and joins it, so by the time `stop` returns no
//! renewal is running or ever will again. A tick that fails — lease
//! past its timeout, rename race lost, storage down — stops the thread
//! and marks the lease expired; there is no automatic retry or
//! reacquisition.

use super::lock::{self, LeaseState};
use super::options::LeaseOptions;
use crate::storage::Storage;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

pub(crate) struct Heartbeat {
    cancel: Arc<(Mutex<bool>, Condvar)>,
    handle: JoinHandle<()>,
}

impl Heartbeat {
    /// Spawn the renewal thread for a freshly acquired lease.
    pub(crate) fn start(
        storage: Arc<dyn Storage>,
        dir: String,
        options: LeaseOptions,
        state: Arc<Mutex<LeaseState>>,
        owner: String,
    ) -> std::io::Result<Self> {
        let cancel = Arc::new((Mutex::new(false), Condvar::new()));
        let shared = Arc::clone(&cancel);

        let thread_name = format!("walfence{}", dir.replace('/', "-"));
        let handle = thread::Builder::new().name(thread_name).spawn(move || {
            run(&shared, storage.as_ref(), &dir, &options, &state, &owner);
        })?;

        Ok(Self { cancel, handle })
    }

    /// Cancel and join the renewal thread.
    pub(crate) fn stop(self) {
        {
            let (flag, condvar) = &*self.cancel;
            let mut cancelled = flag.lock().unwrap_or_else(|poison| poison.into_inner());
            *cancelled = true;
            condvar.notify_all();
        }

        // Join so no renewal can complete after stop() returns.
        if self.handle.join().is_err() {
            tracing::warn!("wal lease heartbeat thread panicked");
        }
    }
}

fn run(
    cancel: &(Mutex<bool>, Condvar),
    storage: &dyn Storage,
    dir: &str,
    options: &LeaseOptions,
    state: &Mutex<LeaseState>,
    owner: &str,
) {
    let interval = options.renewal_interval();
    let (flag, condvar) = cancel;
    let mut cancelled = flag.lock().unwrap_or_else(|poison| poison.into_inner());

    loop {
        // Sleep one interval, waking early only for cancellation.
        // Condvars wake spuriously, hence the deadline loop.
        let deadline = Instant::now() + interval;
        while !*cancelled {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (guard, _) = condvar
                .wait_timeout(cancelled, deadline - now)
                .unwrap_or_else(|poison| poison.into_inner());
            cancelled = guard;
        }
        if *cancelled {
            return;
        }

        // The cancel guard stays held across the tick: a concurrent
        // stop() blocks until an in-flight renewal has finished rather
        // than racing it.
        let mut lease = lock::lock_state(state);
        match lock::renew_under_lock(storage, dir, options, &mut lease) {
            Ok(()) => {
                tracing::trace!(dir = %dir, marker = %lease.marker_name, "renewed wal lease");
            }
            Err(e) => {
                // Expiry and lost races already marked the lease; a
                // storage failure costs ownership too, since renewals
                // stop here either way.
                lease.expired = true;
                tracing::warn!(
                    dir = %dir,
                    owner = %owner,
                    error = %e,
                    "wal lease heartbeat stopping; ownership lost"
                );
                return;
            }
        }
    }
}
