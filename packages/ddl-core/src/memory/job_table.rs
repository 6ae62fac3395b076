use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{DdlError, Result};
use crate::job::{DdlJob, MdlInfo};
use crate::store::{JobTable, Session};

#[derive(Debug, Default)]
struct JobTableState {
    next_id: i64,
    pending: BTreeMap<i64, DdlJob>,
    history: BTreeMap<i64, DdlJob>,
    mdl: BTreeMap<i64, MdlInfo>,
}

/// Job queue, job history and MDL rows held in process memory.
#[derive(Debug, Default)]
pub struct MemoryJobTable {
    state: Mutex<JobTableState>,
    failures: AtomicU32,
}

/// Whether `later` must wait for `earlier` to finish.
fn conflicts(earlier: &DdlJob, later: &DdlJob) -> bool {
    if earlier.action.is_schema_level() || later.action.is_schema_level() {
        return earlier.schema_id == later.schema_id;
    }
    let earlier_tables = earlier.involved_table_ids();
    later
        .involved_table_ids()
        .iter()
        .any(|id| earlier_tables.contains(id))
}

impl MemoryJobTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` calls fail with `DdlError::Store`.
    pub fn inject_failures(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Number of jobs not yet moved to history.
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn history_count(&self) -> usize {
        self.lock().history.len()
    }

    fn lock(&self) -> MutexGuard<'_, JobTableState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(
        &self,
        session: &mut dyn Session,
        statement: &str,
    ) -> Result<MutexGuard<'_, JobTableState>> {
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(DdlError::Store("injected job table failure".into()));
        }
        session.execute_query(statement)?;
        Ok(self.lock())
    }
}

impl JobTable for MemoryJobTable {
    fn insert_job(&self, session: &mut dyn Session, job: &mut DdlJob) -> Result<i64> {
        let mut state = self.state(session, "INSERT INTO ddl_job")?;
        if job.id == 0 {
            state.next_id += 1;
            job.id = state.next_id;
        } else {
            state.next_id = state.next_id.max(job.id);
        }
        state.pending.insert(job.id, job.clone());
        Ok(job.id)
    }

    fn load_pending_jobs(&self, session: &mut dyn Session) -> Result<Vec<DdlJob>> {
        let state = self.state(session, "SELECT job_meta FROM ddl_job ORDER BY job_id")?;
        let mut runnable = Vec::new();
        let mut seen: Vec<&DdlJob> = Vec::new();
        for job in state.pending.values() {
            if !seen.iter().any(|earlier| conflicts(earlier, job)) {
                runnable.push(job.clone());
            }
            seen.push(job);
        }
        Ok(runnable)
    }

    fn update_job(&self, session: &mut dyn Session, job: &DdlJob) -> Result<()> {
        let mut state = self.state(session, "UPDATE ddl_job SET job_meta")?;
        match state.pending.get_mut(&job.id) {
            Some(slot) => {
                *slot = job.clone();
                Ok(())
            }
            None => Err(DdlError::Store(format!("job {} is not pending", job.id))),
        }
    }

    fn finish_job(&self, session: &mut dyn Session, job: &DdlJob) -> Result<()> {
        let mut state = self.state(session, "DELETE FROM ddl_job; INSERT INTO ddl_history")?;
        state.pending.remove(&job.id);
        state.history.insert(job.id, job.clone());
        Ok(())
    }

    fn job(&self, session: &mut dyn Session, job_id: i64) -> Result<Option<DdlJob>> {
        let state = self.state(session, "SELECT job_meta FROM ddl_job WHERE job_id")?;
        Ok(state.pending.get(&job_id).cloned())
    }

    fn history_job(&self, session: &mut dyn Session, job_id: i64) -> Result<Option<DdlJob>> {
        let state = self.state(session, "SELECT job_meta FROM ddl_history WHERE job_id")?;
        Ok(state.history.get(&job_id).cloned())
    }

    fn set_mdl_info(&self, session: &mut dyn Session, info: &MdlInfo) -> Result<()> {
        let mut state = self.state(session, "REPLACE INTO mdl_info")?;
        state.mdl.insert(info.job_id, info.clone());
        Ok(())
    }

    fn mdl_version(&self, session: &mut dyn Session, job_id: i64) -> Result<Option<i64>> {
        let state = self.state(session, "SELECT version FROM mdl_info WHERE job_id")?;
        Ok(state.mdl.get(&job_id).map(|info| info.version))
    }

    fn mdl_infos(&self, session: &mut dyn Session) -> Result<Vec<MdlInfo>> {
        let state = self.state(session, "SELECT * FROM mdl_info")?;
        Ok(state.mdl.values().cloned().collect())
    }

    fn clean_mdl_info(&self, session: &mut dyn Session, job_id: i64) -> Result<()> {
        let mut state = self.state(session, "DELETE FROM mdl_info WHERE job_id")?;
        state.mdl.remove(&job_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemorySessionPool;
    use crate::schema::{ColumnInfo, SchemaInfo};
    use crate::store::SessionPool;

    #[test]
    fn test_conflicting_jobs_are_held_back() {
        let pool = MemorySessionPool::new();
        let mut session = pool.acquire().unwrap();
        let table = MemoryJobTable::new();

        let mut first = DdlJob::add_column(1, 10, ColumnInfo::new("a", "INT", true)).unwrap();
        let mut second = DdlJob::add_column(1, 10, ColumnInfo::new("b", "INT", true)).unwrap();
        let mut other = DdlJob::add_column(1, 11, ColumnInfo::new("c", "INT", true)).unwrap();
        table.insert_job(session.as_mut(), &mut first).unwrap();
        table.insert_job(session.as_mut(), &mut second).unwrap();
        table.insert_job(session.as_mut(), &mut other).unwrap();

        let ids: Vec<i64> = table
            .load_pending_jobs(session.as_mut())
            .unwrap()
            .iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(ids, vec![first.id, other.id]);

        table.finish_job(session.as_mut(), &first).unwrap();
        let ids: Vec<i64> = table
            .load_pending_jobs(session.as_mut())
            .unwrap()
            .iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(ids, vec![second.id, other.id]);
        assert!(table.history_job(session.as_mut(), first.id).unwrap().is_some());
    }

    #[test]
    fn test_schema_level_job_blocks_tables_of_that_schema() {
        let pool = MemorySessionPool::new();
        let mut session = pool.acquire().unwrap();
        let table = MemoryJobTable::new();

        let mut create = DdlJob::create_schema(SchemaInfo::new(5, "s")).unwrap();
        let mut add = DdlJob::add_column(5, 10, ColumnInfo::new("a", "INT", true)).unwrap();
        table.insert_job(session.as_mut(), &mut create).unwrap();
        table.insert_job(session.as_mut(), &mut add).unwrap();

        let pending = table.load_pending_jobs(session.as_mut()).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, create.id);
    }
}
