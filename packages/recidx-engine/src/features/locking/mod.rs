//! Per-record advisory locking.
//!
//! The updater and the indexer's explicit entry points take an
//! exclusive named lock on the record id before touching its index
//! state, so that writers for the same record never interleave even
//! when event partitioning changes. Locks are advisory scoping for
//! this engine's own writers only, never consulted by readers.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::warn;

use recidx_model::AbsoluteRecordId;

use crate::stop::StopSignal;
use crate::{EngineError, Result};

/// Exclusive named locks. `lock` blocks until the lock is held or the
/// stop signal fires, in which case it returns [`EngineError::Interrupted`].
pub trait LockManager: Send + Sync {
    fn lock(&self, name: &str, stop: &StopSignal) -> Result<()>;
    fn unlock(&self, name: &str) -> Result<()>;
}

/// In-process lock manager backed by a mutex-guarded name set.
///
/// Waiters poll the stop signal between condvar wakeups so a shutdown
/// request unblocks them promptly.
#[derive(Default)]
pub struct InProcessLockManager {
    held: Mutex<HashSet<String>>,
    released: Condvar,
}

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

impl InProcessLockManager {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LockManager for InProcessLockManager {
    fn lock(&self, name: &str, stop: &StopSignal) -> Result<()> {
        let mut held = self.held.lock();
        while held.contains(name) {
            if stop.is_stopped() {
                return Err(EngineError::Interrupted);
            }
            self.released.wait_for(&mut held, STOP_POLL_INTERVAL);
        }
        held.insert(name.to_string());
        Ok(())
    }

    fn unlock(&self, name: &str) -> Result<()> {
        let mut held = self.held.lock();
        if !held.remove(name) {
            return Err(EngineError::lock(format!("lock {name:?} is not held")));
        }
        self.released.notify_all();
        Ok(())
    }
}

/// Record-scoped facade over a [`LockManager`].
///
/// Locking can be disabled per index for bulk rebuild runs where a
/// single writer owns the whole index anyway.
#[derive(Clone)]
pub struct IndexLocker {
    manager: Arc<dyn LockManager>,
    enabled: bool,
}

impl IndexLocker {
    pub fn new(manager: Arc<dyn LockManager>, enabled: bool) -> Self {
        Self { manager, enabled }
    }

    pub fn lock(&self, id: &AbsoluteRecordId, stop: &StopSignal) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        self.manager.lock(&lock_name(id), stop)
    }

    pub fn unlock(&self, id: &AbsoluteRecordId) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        self.manager.unlock(&lock_name(id))
    }

    /// Releases the lock, logging instead of propagating failures. A
    /// failed release must not abort processing that already completed.
    pub fn unlock_log_failure(&self, id: &AbsoluteRecordId) {
        if let Err(error) = self.unlock(id) {
            warn!(record = %id, %error, "failed to release record lock");
        }
    }
}

fn lock_name(id: &AbsoluteRecordId) -> String {
    format!("records/{id}")
}
