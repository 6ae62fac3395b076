//! Process-wide state shared by every DDL component of one node.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use ddl_core::config::DdlConfig;
use ddl_core::store::{Collaborators, SessionGuard};
use ddl_core::{DdlError, VersionedSchemaCache};

use crate::Result;

/// DDL ownership flag, set by the external election.
#[derive(Debug, Clone, Default)]
pub struct Ownership(Arc<AtomicBool>);

impl Ownership {
    pub fn new(owner: bool) -> Self {
        Self(Arc::new(AtomicBool::new(owner)))
    }

    pub fn is_owner(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn set_owner(&self, owner: bool) {
        self.0.store(owner, Ordering::SeqCst);
    }
}

/// Stop signal observed by every background loop.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals shutdown and wakes every sleeper.
    pub fn trigger(&self) {
        let (lock, cvar) = &*self.inner;
        *lock.lock() = true;
        cvar.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Sleeps for `duration` unless shutdown is signalled first.
    ///
    /// Returns `false` if the sleep was cut short by shutdown.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let (lock, cvar) = &*self.inner;
        let mut stopped = lock.lock();
        while !*stopped {
            if cvar.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        !*stopped
    }
}

/// Ids of jobs currently held by a worker on this node.
#[derive(Debug, Default)]
pub struct RunningJobs {
    ids: Mutex<HashSet<i64>>,
}

impl RunningJobs {
    /// Claims `job_id`; false if it is already running.
    pub fn try_insert(&self, job_id: i64) -> bool {
        self.ids.lock().insert(job_id)
    }

    pub fn remove(&self, job_id: i64) {
        self.ids.lock().remove(&job_id);
    }

    pub fn contains(&self, job_id: i64) -> bool {
        self.ids.lock().contains(&job_id)
    }

    pub fn len(&self) -> usize {
        self.ids.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Convergence bookkeeping of the owner.
#[derive(Debug, Default)]
pub struct SyncTracker {
    synced: Mutex<HashSet<i64>>,
    /// Set when dispatch ran while this node was not the owner; forces a
    /// resync before the next job runs.
    once: AtomicBool,
}

impl SyncTracker {
    pub fn is_synced(&self, job_id: i64) -> bool {
        self.synced.lock().contains(&job_id)
    }

    pub fn mark_synced(&self, job_id: i64) {
        self.synced.lock().insert(job_id);
    }

    pub fn forget(&self, job_id: i64) {
        self.synced.lock().remove(&job_id);
    }

    pub fn set_once(&self, once: bool) {
        self.once.store(once, Ordering::SeqCst);
    }

    pub fn once(&self) -> bool {
        self.once.load(Ordering::SeqCst)
    }
}

/// Everything one node's DDL components share.
pub struct DdlContext {
    pub node_id: String,
    pub config: DdlConfig,
    pub ownership: Ownership,
    pub shutdown: Shutdown,
    pub cache: Arc<VersionedSchemaCache>,
    pub running_jobs: RunningJobs,
    pub sync_tracker: SyncTracker,
    pub collaborators: Collaborators,
}

impl DdlContext {
    pub fn new(node_id: &str, config: DdlConfig, collaborators: Collaborators) -> Arc<Self> {
        let cache = Arc::new(VersionedSchemaCache::new(config.schema_cache_capacity));
        Arc::new(Self {
            node_id: node_id.to_string(),
            config,
            ownership: Ownership::default(),
            shutdown: Shutdown::new(),
            cache,
            running_jobs: RunningJobs::default(),
            sync_tracker: SyncTracker::default(),
            collaborators,
        })
    }

    pub fn is_owner(&self) -> bool {
        self.ownership.is_owner()
    }

    /// `NotOwner` unless this node currently owns DDL.
    pub fn ensure_owner(&self) -> Result<()> {
        if self.is_owner() {
            Ok(())
        } else {
            Err(DdlError::NotOwner)
        }
    }

    /// Acquires a scoped session in auto-commit mode.
    pub fn session(&self) -> Result<SessionGuard> {
        let mut session = SessionGuard::acquire(&self.collaborators.sessions)?;
        session.set_auto_commit(true)?;
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_shutdown_interrupts_sleep() {
        let shutdown = Shutdown::new();
        let sleeper = {
            let shutdown = shutdown.clone();
            thread::spawn(move || shutdown.sleep(Duration::from_secs(30)))
        };
        thread::sleep(Duration::from_millis(20));
        shutdown.trigger();
        assert!(!sleeper.join().unwrap());
        assert!(!shutdown.sleep(Duration::from_millis(1)));
    }

    #[test]
    fn test_sleep_runs_to_completion() {
        let shutdown = Shutdown::new();
        assert!(shutdown.sleep(Duration::from_millis(5)));
    }

    #[test]
    fn test_running_jobs_claims_once() {
        let running = RunningJobs::default();
        assert!(running.try_insert(4));
        assert!(!running.try_insert(4));
        running.remove(4);
        assert!(running.try_insert(4));
    }
}
