use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{DdlError, Result};
use crate::store::{Session, SessionPool};

#[derive(Debug, Default)]
struct SessionStats {
    acquired: AtomicU64,
    released: AtomicU64,
    statements: AtomicU64,
}

/// Session that only counts the statements it is given.
#[derive(Debug)]
pub struct MemorySession {
    id: u64,
    auto_commit: bool,
    stats: Arc<SessionStats>,
}

impl Session for MemorySession {
    fn id(&self) -> u64 {
        self.id
    }

    fn set_auto_commit(&mut self, auto_commit: bool) -> Result<()> {
        self.auto_commit = auto_commit;
        Ok(())
    }

    fn auto_commit(&self) -> bool {
        self.auto_commit
    }

    fn execute_query(&mut self, sql: &str) -> Result<Vec<Vec<serde_json::Value>>> {
        tracing::trace!("session {} executing: {}", self.id, sql);
        self.stats.statements.fetch_add(1, Ordering::Relaxed);
        Ok(Vec::new())
    }
}

/// Pool of [`MemorySession`]s that tracks acquire/release balance.
#[derive(Debug)]
pub struct MemorySessionPool {
    next_id: AtomicU64,
    available: AtomicBool,
    stats: Arc<SessionStats>,
}

impl Default for MemorySessionPool {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySessionPool {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            available: AtomicBool::new(true),
            stats: Arc::new(SessionStats::default()),
        }
    }

    /// When false, `acquire` fails with `DdlError::SessionUnavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn acquired(&self) -> u64 {
        self.stats.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> u64 {
        self.stats.released.load(Ordering::SeqCst)
    }

    /// Sessions acquired but not yet released.
    pub fn outstanding(&self) -> u64 {
        self.acquired().saturating_sub(self.released())
    }

    pub fn statements(&self) -> u64 {
        self.stats.statements.load(Ordering::Relaxed)
    }
}

impl SessionPool for MemorySessionPool {
    fn acquire(&self) -> Result<Box<dyn Session>> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(DdlError::SessionUnavailable("session pool offline".into()));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySession {
            id,
            auto_commit: false,
            stats: Arc::clone(&self.stats),
        }))
    }

    fn release(&self, session: &mut dyn Session) {
        if let Err(e) = session.set_auto_commit(false) {
            tracing::warn!("Failed to reset session {}: {}", session.id(), e);
        }
        self.stats.released.fetch_add(1, Ordering::SeqCst);
    }
}
