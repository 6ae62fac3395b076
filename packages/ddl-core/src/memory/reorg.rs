use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::error::{DdlError, Result};
use crate::job::DdlJob;
use crate::schema::{IndexInfo, TableInfo};
use crate::store::ReorgExecutor;

/// Backfill that succeeds immediately unless told to fail.
#[derive(Debug, Default)]
pub struct MemoryReorg {
    backfills: AtomicU64,
    fail_next: Mutex<Option<String>>,
}

impl MemoryReorg {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next backfill fail with `DdlError::ReorgFailed(reason)`.
    pub fn fail_next(&self, reason: &str) {
        *self.fail_next.lock().unwrap_or_else(PoisonError::into_inner) = Some(reason.to_string());
    }

    pub fn backfills(&self) -> u64 {
        self.backfills.load(Ordering::SeqCst)
    }
}

impl ReorgExecutor for MemoryReorg {
    fn backfill(&self, job: &DdlJob, table: &TableInfo, index: Option<&IndexInfo>) -> Result<()> {
        self.backfills.fetch_add(1, Ordering::SeqCst);
        let failure = self
            .fail_next
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(reason) = failure {
            return Err(DdlError::ReorgFailed(reason));
        }
        tracing::debug!(
            "Backfilled table {} for job {} (index {:?})",
            table.name,
            job.id,
            index.map(|i| i.name.as_str())
        );
        Ok(())
    }
}
