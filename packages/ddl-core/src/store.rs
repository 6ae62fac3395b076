//! Boundaries to the services the coordination layer consumes.
//!
//! The job table, catalog, coordination service, timestamp oracle and
//! session executor live outside this crate. `crate::memory` provides
//! in-process implementations of every trait here.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::job::{DdlJob, MdlInfo};
use crate::metrics::{MetricsSink, NoopMetrics};
use crate::schema::{IndexInfo, SchemaDiff, SchemaInfo, TableInfo};

/// Key holding the newest published schema version.
pub const GLOBAL_SCHEMA_VERSION_KEY: &str = "ddl/global_schema_version";
/// Prefix of the per-node self-version keys.
pub const ALL_SCHEMA_VERSIONS_PREFIX: &str = "ddl/all_schema_versions/";
/// Prefix of the per-job MDL acknowledgment keys.
pub const ALL_SCHEMA_BY_JOB_VERSIONS_PREFIX: &str = "ddl/all_schema_by_job_versions/";
/// Key bumped whenever a job is submitted anywhere in the cluster.
pub const ADDING_DDL_JOB_KEY: &str = "ddl/adding_ddl_job_concurrent";

/// Self-version key of `node_id`.
pub fn self_version_key(node_id: &str) -> String {
    format!("{}{}", ALL_SCHEMA_VERSIONS_PREFIX, node_id)
}

/// Prefix of every acknowledgment of `job_id`.
pub fn job_ack_prefix(job_id: i64) -> String {
    format!("{}{}/", ALL_SCHEMA_BY_JOB_VERSIONS_PREFIX, job_id)
}

/// Acknowledgment key of `node_id` for `job_id`.
pub fn job_ack_key(job_id: i64, node_id: &str) -> String {
    format!("{}{}", job_ack_prefix(job_id), node_id)
}

/// Short-lived executor for catalog queries.
pub trait Session: Send {
    fn id(&self) -> u64;
    fn set_auto_commit(&mut self, auto_commit: bool) -> Result<()>;
    fn auto_commit(&self) -> bool;
    fn execute_query(&mut self, sql: &str) -> Result<Vec<Vec<serde_json::Value>>>;
}

/// Hands out sessions.
pub trait SessionPool: Send + Sync {
    fn acquire(&self) -> Result<Box<dyn Session>>;
    /// Called once per acquired session when its scope ends.
    fn release(&self, session: &mut dyn Session);
}

/// Scoped session: released back to its pool when dropped.
pub struct SessionGuard {
    pool: Arc<dyn SessionPool>,
    session: Box<dyn Session>,
}

impl SessionGuard {
    pub fn acquire(pool: &Arc<dyn SessionPool>) -> Result<Self> {
        let session = pool.acquire()?;
        Ok(Self {
            pool: Arc::clone(pool),
            session,
        })
    }
}

impl Deref for SessionGuard {
    type Target = dyn Session;

    fn deref(&self) -> &Self::Target {
        self.session.as_ref()
    }
}

impl DerefMut for SessionGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session.as_mut()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.pool.release(self.session.as_mut());
    }
}

/// Durable DDL job queue.
pub trait JobTable: Send + Sync {
    /// Persists a new job, assigning its id.
    fn insert_job(&self, session: &mut dyn Session, job: &mut DdlJob) -> Result<i64>;

    /// Runnable unfinished jobs ordered by id.
    ///
    /// A job is left out while an earlier unfinished job touches the same
    /// table, or the same schema when either job is schema-level.
    fn load_pending_jobs(&self, session: &mut dyn Session) -> Result<Vec<DdlJob>>;

    fn update_job(&self, session: &mut dyn Session, job: &DdlJob) -> Result<()>;

    /// Moves a job from the queue into the history.
    fn finish_job(&self, session: &mut dyn Session, job: &DdlJob) -> Result<()>;

    /// Job still in the queue.
    fn job(&self, session: &mut dyn Session, job_id: i64) -> Result<Option<DdlJob>>;

    fn history_job(&self, session: &mut dyn Session, job_id: i64) -> Result<Option<DdlJob>>;

    fn set_mdl_info(&self, session: &mut dyn Session, info: &MdlInfo) -> Result<()>;

    /// Version recorded for the job's MDL wait, if any.
    fn mdl_version(&self, session: &mut dyn Session, job_id: i64) -> Result<Option<i64>>;

    fn mdl_infos(&self, session: &mut dyn Session) -> Result<Vec<MdlInfo>>;

    fn clean_mdl_info(&self, session: &mut dyn Session, job_id: i64) -> Result<()>;
}

/// Durable schema catalog.
pub trait CatalogStore: Send + Sync {
    fn schema_version(&self) -> Result<i64>;
    /// Allocates the next schema version.
    fn gen_schema_version(&self) -> Result<i64>;
    fn gen_global_id(&self) -> Result<i64>;

    fn set_schema_diff(&self, diff: &SchemaDiff) -> Result<()>;
    fn schema_diff(&self, version: i64) -> Result<Option<SchemaDiff>>;
    /// Deletes diffs at or below `upto`, returning how many were removed.
    fn del_schema_diff(&self, upto: i64) -> Result<usize>;
    /// Newest version that has a recorded diff, 0 if none.
    fn schema_version_with_non_empty_diff(&self) -> Result<i64>;

    fn schemas(&self) -> Result<Vec<SchemaInfo>>;
    fn schema(&self, schema_id: i64) -> Result<Option<SchemaInfo>>;
    fn create_schema(&self, schema: &SchemaInfo) -> Result<()>;
    fn drop_schema(&self, schema_id: i64) -> Result<()>;

    fn tables(&self, schema_id: i64) -> Result<Vec<TableInfo>>;
    fn table(&self, schema_id: i64, table_id: i64) -> Result<Option<TableInfo>>;
    fn create_table(&self, schema_id: i64, table: &TableInfo) -> Result<()>;
    fn update_table(&self, schema_id: i64, table: &TableInfo) -> Result<()>;
    fn drop_table(&self, schema_id: i64, table_id: i64) -> Result<()>;
}

/// Change observed on a watched key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEvent {
    /// Key written; carries the new revision or value.
    Put(i64),
    Delete,
    /// Nothing happened before the timeout.
    Idle,
}

/// Stream of changes on one key. An error means the watch is broken.
pub trait WatchStream: Send {
    fn next(&mut self, timeout: Duration) -> Result<WatchEvent>;
}

/// Shared key-value coordination store.
pub trait CoordinationService: Send + Sync {
    fn put(&self, key: &str, value: i64) -> Result<()>;
    fn get(&self, key: &str) -> Result<Option<i64>>;
    fn delete(&self, key: &str) -> Result<()>;
    fn delete_prefix(&self, prefix: &str) -> Result<usize>;
    /// Keys under `prefix` with their values, ordered by key.
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, i64)>>;
    fn watch(&self, key: &str) -> Result<Box<dyn WatchStream>>;
}

/// Cluster timestamp oracle.
pub trait TimestampSource: Send + Sync {
    fn next_timestamp(&self) -> Result<i64>;
}

/// Local view of transaction metadata locks.
pub trait MetadataLockView: Send + Sync {
    /// True if a local transaction locked one of `table_ids` at a schema
    /// version older than `version`.
    fn holds_stale_lock(&self, table_ids: &[i64], version: i64) -> bool;
}

/// Data backfill of actions that need a reorganization.
pub trait ReorgExecutor: Send + Sync {
    fn backfill(&self, job: &DdlJob, table: &TableInfo, index: Option<&IndexInfo>) -> Result<()>;
}

/// Every collaborator one node talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub job_table: Arc<dyn JobTable>,
    pub catalog: Arc<dyn CatalogStore>,
    pub coordination: Arc<dyn CoordinationService>,
    pub timestamps: Arc<dyn TimestampSource>,
    pub sessions: Arc<dyn SessionPool>,
    pub locks: Arc<dyn MetadataLockView>,
    pub reorg: Arc<dyn ReorgExecutor>,
    pub metrics: Arc<dyn MetricsSink>,
}

impl Collaborators {
    /// Replaces the metrics sink.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Disables metrics.
    pub fn without_metrics(self) -> Self {
        self.with_metrics(Arc::new(NoopMetrics))
    }
}
