//! The per-file exclusive access discipline (§4.C) plus the engine-wide
//! in-flight operation ceiling (§5's `maxConnections`).
//!
//! This is modeled as a per-path exclusive-lock table behind an outer
//! mutex. Contention here is purely intra-process (per §4.C, "no kernel
//! file lock"), so a condvar-guarded flag per path is enough -- there is no
//! need for an OS-level advisory lock since nothing outside this process
//! ever opens the same collection file concurrently. Fairness is FCFS in
//! practice because waiters block on the same condvar and are woken one at
//! a time as the lock is released.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};

struct PathLock {
    held: Mutex<bool>,
    released: Condvar,
}

impl PathLock {
    fn new() -> Self {
        PathLock {
            held: Mutex::new(false),
            released: Condvar::new(),
        }
    }

    fn lock(self: &Arc<Self>) {
        let mut held = self.held.lock().unwrap();
        while *held {
            held = self.released.wait(held).unwrap();
        }
        *held = true;
    }

    fn unlock(&self) {
        let mut held = self.held.lock().unwrap();
        *held = false;
        self.released.notify_one();
    }
}

/// Serializes callers per collection path, and caps the number of
/// concurrently in-flight operations across all collections.
pub struct Gate {
    paths: Mutex<HashMap<PathBuf, Arc<PathLock>>>,
    permits: Mutex<usize>,
    permits_available: Condvar,
    max_permits: usize,
}

/// Held while a caller has both a connection permit and the exclusive lock
/// on a single collection path. Dropping it releases both.
pub struct GateGuard<'a> {
    gate: &'a Gate,
    path_lock: Arc<PathLock>,
}

impl Gate {
    pub fn new(max_connections: usize) -> Self {
        Gate {
            paths: Mutex::new(HashMap::new()),
            permits: Mutex::new(0),
            permits_available: Condvar::new(),
            max_permits: max_connections.max(1),
        }
    }

    /// Acquires a connection permit and the exclusive lock for `path`,
    /// blocking the calling thread until both are available.
    pub fn acquire(&self, path: &Path) -> GateGuard<'_> {
        self.acquire_permit();

        let path_lock = {
            let mut paths = self.paths.lock().unwrap();
            paths
                .entry(path.to_path_buf())
                .or_insert_with(|| Arc::new(PathLock::new()))
                .clone()
        };
        path_lock.lock();

        log::debug!("gate acquired for {}", path.display());
        GateGuard {
            gate: self,
            path_lock,
        }
    }

    fn acquire_permit(&self) {
        let mut permits = self.permits.lock().unwrap();
        while *permits >= self.max_permits {
            log::debug!("gate waiting for a connection permit");
            permits = self.permits_available.wait(permits).unwrap();
        }
        *permits += 1;
    }

    fn release_permit(&self) {
        let mut permits = self.permits.lock().unwrap();
        *permits -= 1;
        self.permits_available.notify_one();
    }

    /// Drops the per-path lock entry entirely, used when a collection is
    /// dropped so the gate table doesn't accumulate entries for collections
    /// that no longer exist.
    pub fn forget(&self, path: &Path) {
        self.paths.lock().unwrap().remove(path);
    }
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.path_lock.unlock();
        self.gate.release_permit();
    }
}
