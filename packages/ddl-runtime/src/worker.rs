//! Job worker: drives one DDL job through its state machine.
//!
//! queueing -> running -> done, or running -> rolling back -> rollback done.
//! Done and rollback-done jobs are never re-applied; the caller runs the
//! convergence barrier and moves the job to history.

use std::sync::Arc;

use ddl_core::job::{
    ColumnArgs, CreateSchemaArgs, CreateTableArgs, CreateTablesArgs, IndexArgs, NameArgs,
    TruncateTableArgs,
};
use ddl_core::retry::retry_transient;
use ddl_core::schema::{normalize_name, AffectedOption, IndexState, SchemaDiff, TableInfo};
use ddl_core::store::Session;
use ddl_core::{ActionType, DdlError, DdlJob, JobState};

use crate::context::DdlContext;
use crate::Result;

/// Executes jobs on behalf of the owner.
pub struct JobWorker {
    id: usize,
    ctx: Arc<DdlContext>,
}

impl JobWorker {
    pub fn new(id: usize, ctx: Arc<DdlContext>) -> Self {
        Self { id, ctx }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Advances `job` as far as it goes without waiting for other nodes.
    ///
    /// Returns the schema version the cluster must converge on, or 0 when
    /// the job rolled back and published nothing. Retryable errors leave the
    /// job in its persisted state for a later run.
    pub fn handle_job_table(&self, session: &mut dyn Session, job: &mut DdlJob) -> Result<i64> {
        match job.state {
            JobState::Done | JobState::Synced => return Ok(job.schema_version),
            JobState::RollbackDone => return Ok(0),
            JobState::Queueing => {
                self.ensure_owner()?;
                job.start_ts = self.ctx.collaborators.timestamps.next_timestamp()?;
                job.state = JobState::Running;
                self.persist(session, job)?;
                tracing::info!(
                    "Worker {} started job {} ({}) at ts {}",
                    self.id,
                    job.id,
                    job.action,
                    job.start_ts
                );
            }
            JobState::Running | JobState::RollingBack => {}
        }

        if job.is_running() {
            self.ensure_owner()?;
            if self.diff_recorded(job)? {
                tracing::info!(
                    "Job {} resumed with its diff already stored at version {}",
                    job.id,
                    job.schema_version
                );
                return self.mark_done(session, job);
            }
            match self.run_action(session, job) {
                Ok(diff) => return self.publish(session, job, diff),
                Err(e) if e.is_job_fatal() => {
                    tracing::warn!("Job {} ({}) failed, rolling back: {}", job.id, job.action, e);
                    job.encode_error(&e.to_string());
                    job.state = JobState::RollingBack;
                    self.persist(session, job)?;
                }
                Err(e) => return Err(e),
            }
        }

        self.ensure_owner()?;
        self.rollback(job)?;
        job.state = JobState::RollbackDone;
        job.schema_version = 0;
        self.persist(session, job)?;
        tracing::info!("Job {} rolled back", job.id);
        Ok(0)
    }

    fn ensure_owner(&self) -> Result<()> {
        self.ctx.ensure_owner()
    }

    fn persist(&self, session: &mut dyn Session, job: &DdlJob) -> Result<()> {
        let config = &self.ctx.config;
        let job_table = &self.ctx.collaborators.job_table;
        retry_transient(
            || job_table.update_job(&mut *session, job),
            config.store_max_retries,
            config.store_retry_delay_ms,
            "update ddl job",
        )
    }

    /// Records that the job is about to touch the catalog.
    fn begin_write(&self, session: &mut dyn Session, job: &mut DdlJob) -> Result<()> {
        self.ensure_owner()?;
        if !job.catalog_written {
            job.catalog_written = true;
            if let Err(e) = self.persist(session, job) {
                job.catalog_written = false;
                return Err(e);
            }
        }
        Ok(())
    }

    fn diff_recorded(&self, job: &DdlJob) -> Result<bool> {
        if !job.catalog_written || job.schema_version == 0 {
            return Ok(false);
        }
        Ok(self
            .ctx
            .collaborators
            .catalog
            .schema_diff(job.schema_version)?
            .is_some())
    }

    /// Allocates the job's schema version and records its diff.
    ///
    /// The version is persisted on the job before the diff is written so a
    /// resumed job reuses it.
    fn publish(&self, session: &mut dyn Session, job: &mut DdlJob, mut diff: SchemaDiff) -> Result<i64> {
        let config = &self.ctx.config;
        let catalog = &self.ctx.collaborators.catalog;
        if job.schema_version == 0 {
            job.schema_version = retry_transient(
                || catalog.gen_schema_version(),
                config.store_max_retries,
                config.store_retry_delay_ms,
                "generate schema version",
            )?;
            self.persist(session, job)?;
        }
        diff.version = job.schema_version;
        retry_transient(
            || catalog.set_schema_diff(&diff),
            config.store_max_retries,
            config.store_retry_delay_ms,
            "store schema diff",
        )?;
        self.mark_done(session, job)
    }

    fn mark_done(&self, session: &mut dyn Session, job: &mut DdlJob) -> Result<i64> {
        job.state = JobState::Done;
        self.persist(session, job)?;
        tracing::info!(
            "Job {} ({}) done at schema version {}",
            job.id,
            job.action,
            job.schema_version
        );
        Ok(job.schema_version)
    }

    fn run_action(&self, session: &mut dyn Session, job: &mut DdlJob) -> Result<SchemaDiff> {
        match job.action {
            ActionType::CreateSchema => self.create_schema(session, job),
            ActionType::DropSchema => self.drop_schema(session, job),
            ActionType::CreateTable => self.create_table(session, job),
            ActionType::CreateTables => self.create_tables(session, job),
            ActionType::DropTable => self.drop_table(session, job),
            ActionType::TruncateTable => self.truncate_table(session, job),
            ActionType::AddColumn => self.add_column(session, job),
            ActionType::DropColumn => self.drop_column(session, job),
            ActionType::ModifyColumn => self.modify_column(session, job),
            ActionType::AddIndex | ActionType::AddPrimaryKey => self.add_index(session, job),
            ActionType::DropIndex => self.drop_index(session, job),
            ActionType::None => Err(DdlError::UnsupportedAction(job.action.to_string())),
        }
    }

    fn create_schema(&self, session: &mut dyn Session, job: &mut DdlJob) -> Result<SchemaDiff> {
        let args: CreateSchemaArgs = job.decode_args()?;
        let catalog = &self.ctx.collaborators.catalog;
        let schemas = catalog.schemas()?;
        let applied = job.catalog_written
            && schemas
                .iter()
                .any(|s| s.id == args.schema.id && s.name == args.schema.name);
        if !applied {
            if schemas
                .iter()
                .any(|s| s.id == args.schema.id || s.name == args.schema.name)
            {
                return Err(DdlError::SchemaExists(args.schema.name));
            }
            self.begin_write(session, job)?;
            catalog.create_schema(&args.schema)?;
        }
        job.schema_name = args.schema.name;
        Ok(SchemaDiff::new(job.action, job.schema_id, 0))
    }

    fn drop_schema(&self, session: &mut dyn Session, job: &mut DdlJob) -> Result<SchemaDiff> {
        let catalog = &self.ctx.collaborators.catalog;
        match catalog.schema(job.schema_id)? {
            Some(schema) => {
                job.schema_name = schema.name;
                self.begin_write(session, job)?;
                catalog.drop_schema(schema.id)?;
            }
            None if job.catalog_written => {}
            None => return Err(DdlError::SchemaNotFound(job.schema_id)),
        }
        Ok(SchemaDiff::new(job.action, job.schema_id, 0))
    }

    fn create_table(&self, session: &mut dyn Session, job: &mut DdlJob) -> Result<SchemaDiff> {
        let args: CreateTableArgs = job.decode_args()?;
        let catalog = &self.ctx.collaborators.catalog;
        let applied =
            job.catalog_written && catalog.table(job.schema_id, args.table.id)?.is_some();
        if !applied {
            self.check_table_absent(job.schema_id, &args.table, &[])?;
            self.begin_write(session, job)?;
            catalog.create_table(job.schema_id, &args.table)?;
        }
        let mut diff = SchemaDiff::new(job.action, job.schema_id, args.table.id);
        diff.table_name = args.table.name;
        Ok(diff)
    }

    /// Validates the whole batch before creating any table.
    fn create_tables(&self, session: &mut dyn Session, job: &mut DdlJob) -> Result<SchemaDiff> {
        let args: CreateTablesArgs = job.decode_args()?;
        let catalog = &self.ctx.collaborators.catalog;
        let mut missing = Vec::with_capacity(args.tables.len());
        for (ix, table) in args.tables.iter().enumerate() {
            if job.catalog_written && catalog.table(job.schema_id, table.id)?.is_some() {
                continue;
            }
            self.check_table_absent(job.schema_id, table, &args.tables[..ix])?;
            missing.push(table);
        }
        if !missing.is_empty() {
            self.begin_write(session, job)?;
        }
        for table in missing {
            catalog.create_table(job.schema_id, table)?;
        }

        let mut diff = SchemaDiff::new(job.action, job.schema_id, 0);
        diff.affected_opts = args
            .tables
            .iter()
            .map(|table| AffectedOption {
                schema_id: job.schema_id,
                table_id: table.id,
                old_schema_id: 0,
                old_table_id: 0,
            })
            .collect();
        Ok(diff)
    }

    fn drop_table(&self, session: &mut dyn Session, job: &mut DdlJob) -> Result<SchemaDiff> {
        match self.load_table(job) {
            Ok(table) => {
                job.table_name = table.name;
                self.begin_write(session, job)?;
                self.ctx
                    .collaborators
                    .catalog
                    .drop_table(job.schema_id, table.id)?;
            }
            Err(DdlError::TableNotFound { .. }) if job.catalog_written => {}
            Err(e) => return Err(e),
        }
        let mut diff = SchemaDiff::new(job.action, job.schema_id, job.table_id);
        diff.table_name = job.table_name.clone();
        Ok(diff)
    }

    fn truncate_table(&self, session: &mut dyn Session, job: &mut DdlJob) -> Result<SchemaDiff> {
        let args: TruncateTableArgs = job.decode_args()?;
        let catalog = &self.ctx.collaborators.catalog;
        let fresh = match catalog.table(job.schema_id, args.new_table_id)? {
            Some(fresh) if job.catalog_written => fresh,
            _ => {
                let old = self.load_table(job)?;
                let mut fresh = old.clone();
                fresh.id = args.new_table_id;
                self.begin_write(session, job)?;
                catalog.drop_table(job.schema_id, old.id)?;
                catalog.create_table(job.schema_id, &fresh)?;
                fresh
            }
        };

        job.table_name = fresh.name.clone();
        let mut diff = SchemaDiff::new(job.action, job.schema_id, fresh.id);
        diff.old_table_id = job.table_id;
        diff.table_name = fresh.name;
        Ok(diff)
    }

    fn add_column(&self, session: &mut dyn Session, job: &mut DdlJob) -> Result<SchemaDiff> {
        let mut args: ColumnArgs = job.decode_args()?;
        args.column.name = normalize_name(&args.column.name);
        let mut table = self.load_table(job)?;
        if table.column(&args.column.name).is_some() {
            if job.catalog_written {
                return Ok(Self::table_diff(job, table));
            }
            return Err(DdlError::ColumnExists {
                table: table.name,
                column: args.column.name,
            });
        }
        table.columns.push(args.column);
        self.save_table(session, job, table)
    }

    fn drop_column(&self, session: &mut dyn Session, job: &mut DdlJob) -> Result<SchemaDiff> {
        let args: NameArgs = job.decode_args()?;
        let name = normalize_name(&args.name);
        let mut table = self.load_table(job)?;
        let Some(pos) = table.columns.iter().position(|c| c.name == name) else {
            if job.catalog_written {
                return Ok(Self::table_diff(job, table));
            }
            return Err(DdlError::ColumnNotFound {
                table: table.name,
                column: args.name,
            });
        };
        table.columns.remove(pos);
        self.save_table(session, job, table)
    }

    fn modify_column(&self, session: &mut dyn Session, job: &mut DdlJob) -> Result<SchemaDiff> {
        let mut args: ColumnArgs = job.decode_args()?;
        args.column.name = normalize_name(&args.column.name);
        let mut table = self.load_table(job)?;
        let Some(pos) = table.columns.iter().position(|c| c.name == args.column.name) else {
            return Err(DdlError::ColumnNotFound {
                table: table.name,
                column: args.column.name,
            });
        };
        if table.columns[pos] == args.column {
            if job.catalog_written {
                return Ok(Self::table_diff(job, table));
            }
        } else if job.need_reorg && table.columns[pos].sql_type != args.column.sql_type {
            self.ctx.collaborators.reorg.backfill(job, &table, None)?;
        }
        table.columns[pos] = args.column;
        self.save_table(session, job, table)
    }

    /// Adds the index as write-reorganization, backfills it, then makes it public.
    fn add_index(&self, session: &mut dyn Session, job: &mut DdlJob) -> Result<SchemaDiff> {
        let args: IndexArgs = job.decode_args()?;
        let catalog = &self.ctx.collaborators.catalog;
        let mut table = self.load_table(job)?;
        let mut index = args.index;
        index.name = normalize_name(&index.name);

        let existing = table.index(&index.name).map(|i| (i.id, i.state));
        match existing {
            Some((id, _)) if id != index.id => {
                return Err(DdlError::IndexExists {
                    table: table.name,
                    index: index.name,
                });
            }
            Some((_, IndexState::Public)) => {
                if job.catalog_written {
                    return Ok(Self::table_diff(job, table));
                }
                return Err(DdlError::InvalidReorgState(format!(
                    "index {} of table {} is already public",
                    index.name, table.name
                )));
            }
            // Interrupted backfill of this job: resume it.
            Some(_) => {}
            None => {
                if index.primary && table.primary_key().is_some() {
                    return Err(DdlError::IndexExists {
                        table: table.name,
                        index: index.name,
                    });
                }
                if let Some(missing) = index.columns.iter().find(|c| table.column(c).is_none()) {
                    return Err(DdlError::ColumnNotFound {
                        table: table.name.clone(),
                        column: missing.clone(),
                    });
                }
                index.state = IndexState::WriteReorganization;
                table.indexes.push(index.clone());
                self.begin_write(session, job)?;
                catalog.update_table(job.schema_id, &table)?;
            }
        }

        self.ctx
            .collaborators
            .reorg
            .backfill(job, &table, Some(&index))?;

        for slot in table.indexes.iter_mut().filter(|i| i.id == index.id) {
            slot.state = IndexState::Public;
        }
        self.save_table(session, job, table)
    }

    fn drop_index(&self, session: &mut dyn Session, job: &mut DdlJob) -> Result<SchemaDiff> {
        let args: NameArgs = job.decode_args()?;
        let name = normalize_name(&args.name);
        let mut table = self.load_table(job)?;
        let Some(pos) = table.indexes.iter().position(|i| i.name == name) else {
            if job.catalog_written {
                return Ok(Self::table_diff(job, table));
            }
            return Err(DdlError::IndexNotFound {
                table: table.name,
                index: args.name,
            });
        };
        table.indexes.remove(pos);
        self.save_table(session, job, table)
    }

    /// Undoes the partial effects of a failed job.
    fn rollback(&self, job: &DdlJob) -> Result<()> {
        let catalog = &self.ctx.collaborators.catalog;
        match job.action {
            ActionType::AddIndex | ActionType::AddPrimaryKey => {
                let args: IndexArgs = match job.decode_args() {
                    Ok(args) => args,
                    Err(_) => return Ok(()),
                };
                let Some(mut table) = catalog.table(job.schema_id, job.table_id)? else {
                    return Ok(());
                };
                let before = table.indexes.len();
                table.indexes.retain(|i| {
                    !(i.id == args.index.id && i.state == IndexState::WriteReorganization)
                });
                if table.indexes.len() != before {
                    catalog.update_table(job.schema_id, &table)?;
                    tracing::info!(
                        "Removed non-public index {} from table {}",
                        args.index.name,
                        table.name
                    );
                }
            }
            ActionType::CreateTables => {
                let args: CreateTablesArgs = match job.decode_args() {
                    Ok(args) => args,
                    Err(_) => return Ok(()),
                };
                for table in &args.tables {
                    if catalog.table(job.schema_id, table.id)?.is_some() {
                        catalog.drop_table(job.schema_id, table.id)?;
                        tracing::info!("Dropped partially created table {}", table.name);
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn load_table(&self, job: &DdlJob) -> Result<TableInfo> {
        let catalog = &self.ctx.collaborators.catalog;
        if catalog.schema(job.schema_id)?.is_none() {
            return Err(DdlError::SchemaNotFound(job.schema_id));
        }
        catalog
            .table(job.schema_id, job.table_id)?
            .ok_or(DdlError::TableNotFound {
                schema_id: job.schema_id,
                table_id: job.table_id,
            })
    }

    fn save_table(
        &self,
        session: &mut dyn Session,
        job: &mut DdlJob,
        table: TableInfo,
    ) -> Result<SchemaDiff> {
        self.begin_write(session, job)?;
        self.ctx
            .collaborators
            .catalog
            .update_table(job.schema_id, &table)?;
        Ok(Self::table_diff(job, table))
    }

    fn table_diff(job: &mut DdlJob, table: TableInfo) -> SchemaDiff {
        job.table_name = table.name.clone();
        let mut diff = SchemaDiff::new(job.action, job.schema_id, table.id);
        diff.table_name = table.name;
        diff
    }

    /// Rejects a table whose id or name is taken in the schema or earlier in the batch.
    fn check_table_absent(
        &self,
        schema_id: i64,
        table: &TableInfo,
        batch: &[TableInfo],
    ) -> Result<()> {
        let catalog = &self.ctx.collaborators.catalog;
        if catalog.schema(schema_id)?.is_none() {
            return Err(DdlError::SchemaNotFound(schema_id));
        }
        let taken = catalog
            .tables(schema_id)?
            .iter()
            .chain(batch.iter())
            .any(|t| t.id == table.id || t.name == table.name);
        if taken {
            return Err(DdlError::TableExists {
                schema_id,
                table: table.name.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ddl_core::config::DdlConfig;
    use ddl_core::memory::InMemoryCluster;
    use ddl_core::schema::{ColumnInfo, IndexInfo, SchemaInfo};
    use ddl_core::store::{CatalogStore, JobTable, SessionGuard};

    struct Fixture {
        cluster: InMemoryCluster,
        worker: JobWorker,
        ctx: Arc<DdlContext>,
    }

    fn fixture() -> Fixture {
        let cluster = InMemoryCluster::new();
        let config = DdlConfig {
            store_retry_delay_ms: 0,
            ..Default::default()
        };
        let ctx = DdlContext::new("n1", config, cluster.node().collaborators);
        ctx.ownership.set_owner(true);
        Fixture {
            worker: JobWorker::new(1, ctx.clone()),
            ctx,
            cluster,
        }
    }

    fn submit(f: &Fixture, mut job: DdlJob) -> (SessionGuard, DdlJob) {
        let mut session = f.ctx.session().unwrap();
        f.ctx
            .collaborators
            .job_table
            .insert_job(&mut *session, &mut job)
            .unwrap();
        (session, job)
    }

    fn users_table() -> TableInfo {
        TableInfo::new(10, "users", vec![ColumnInfo::new("id", "BIGINT", false)])
    }

    fn seed_table(f: &Fixture) {
        f.cluster
            .catalog
            .create_schema(&SchemaInfo::new(1, "app"))
            .unwrap();
        f.cluster.catalog.create_table(1, &users_table()).unwrap();
    }

    #[test]
    fn test_add_column_reaches_done_with_new_version() {
        let f = fixture();
        seed_table(&f);
        let job = DdlJob::add_column(1, 10, ColumnInfo::new("email", "TEXT", true)).unwrap();
        let (mut session, mut job) = submit(&f, job);

        let version = f.worker.handle_job_table(&mut *session, &mut job).unwrap();
        assert_eq!(version, 1);
        assert_eq!(job.state, JobState::Done);
        assert_eq!(job.schema_version, 1);
        assert!(job.start_ts > 0);
        let table = f.cluster.catalog.table(1, 10).unwrap().unwrap();
        assert!(table.column("email").is_some());
        assert_eq!(
            f.cluster.catalog.schema_diff(1).unwrap().unwrap().action,
            ActionType::AddColumn
        );
    }

    #[test]
    fn test_done_job_is_not_reapplied() {
        let f = fixture();
        seed_table(&f);
        let job = DdlJob::add_column(1, 10, ColumnInfo::new("email", "TEXT", true)).unwrap();
        let (mut session, mut job) = submit(&f, job);
        f.worker.handle_job_table(&mut *session, &mut job).unwrap();

        let again = f.worker.handle_job_table(&mut *session, &mut job).unwrap();
        assert_eq!(again, 1);
        assert_eq!(f.cluster.catalog.schema_version().unwrap(), 1);
    }

    #[test]
    fn test_duplicate_create_rolls_back_with_error() {
        let f = fixture();
        seed_table(&f);
        let job = DdlJob::create_table(1, TableInfo::new(11, "USERS", vec![])).unwrap();
        let (mut session, mut job) = submit(&f, job);

        let version = f.worker.handle_job_table(&mut *session, &mut job).unwrap();
        assert_eq!(version, 0);
        assert_eq!(job.state, JobState::RollbackDone);
        assert!(job.error.as_deref().unwrap().contains("already exists"));
        assert_eq!(f.cluster.catalog.schema_version().unwrap(), 0);
        let stored = f
            .ctx
            .collaborators
            .job_table
            .job(&mut *session, job.id)
            .unwrap()
            .unwrap();
        assert_eq!(stored.state, JobState::RollbackDone);
    }

    #[test]
    fn test_failed_backfill_removes_reorg_index() {
        let f = fixture();
        seed_table(&f);
        f.cluster.reorg.fail_next("disk full");
        let index = IndexInfo {
            id: 50,
            name: "IDX_ID".into(),
            columns: vec!["ID".into()],
            unique: false,
            primary: false,
            state: IndexState::Public,
        };
        let (mut session, mut job) = submit(&f, DdlJob::add_index(1, 10, index).unwrap());

        f.worker.handle_job_table(&mut *session, &mut job).unwrap();
        assert_eq!(job.state, JobState::RollbackDone);
        assert!(job.error.as_deref().unwrap().contains("disk full"));
        let table = f.cluster.catalog.table(1, 10).unwrap().unwrap();
        assert!(table.indexes.is_empty());
    }

    #[test]
    fn test_partial_batch_create_is_undone() {
        let f = fixture();
        seed_table(&f);
        let tables = vec![
            TableInfo::new(20, "a", vec![]),
            TableInfo::new(21, "users", vec![]),
        ];
        let (mut session, mut job) = submit(&f, DdlJob::create_tables(1, tables).unwrap());

        f.worker.handle_job_table(&mut *session, &mut job).unwrap();
        assert_eq!(job.state, JobState::RollbackDone);
        assert!(f.cluster.catalog.table(1, 20).unwrap().is_none());
        assert!(f.cluster.catalog.table(1, 10).unwrap().is_some());
    }

    #[test]
    fn test_not_owner_leaves_job_queued() {
        let f = fixture();
        seed_table(&f);
        f.ctx.ownership.set_owner(false);
        let job = DdlJob::drop_table(1, 10).unwrap();
        let (mut session, mut job) = submit(&f, job);

        let err = f.worker.handle_job_table(&mut *session, &mut job).unwrap_err();
        assert_eq!(err, DdlError::NotOwner);
        assert_eq!(job.state, JobState::Queueing);
    }

    #[test]
    fn test_timestamp_outage_is_retryable() {
        let f = fixture();
        seed_table(&f);
        f.cluster.timestamps.set_available(false);
        let (mut session, mut job) = submit(&f, DdlJob::drop_table(1, 10).unwrap());

        let err = f.worker.handle_job_table(&mut *session, &mut job).unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(job.state, JobState::Queueing);
    }

    fn stored(f: &Fixture, session: &mut SessionGuard, job_id: i64) -> DdlJob {
        f.ctx
            .collaborators
            .job_table
            .job(&mut **session, job_id)
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_lost_done_write_resumes_at_same_version() {
        let f = fixture();
        seed_table(&f);
        let job = DdlJob::add_column(1, 10, ColumnInfo::new("email", "TEXT", true)).unwrap();
        let (mut session, mut job) = submit(&f, job);
        f.worker.handle_job_table(&mut *session, &mut job).unwrap();

        // Durable record left behind when the final Done write fails.
        let mut lost = job.clone();
        lost.state = JobState::Running;
        f.ctx
            .collaborators
            .job_table
            .update_job(&mut *session, &lost)
            .unwrap();

        let mut reloaded = stored(&f, &mut session, job.id);
        let version = f.worker.handle_job_table(&mut *session, &mut reloaded).unwrap();
        assert_eq!(version, 1);
        assert_eq!(reloaded.state, JobState::Done);
        assert!(reloaded.error.is_none());
        assert_eq!(f.cluster.catalog.schema_version().unwrap(), 1);
        assert_eq!(stored(&f, &mut session, job.id).state, JobState::Done);
    }

    #[test]
    fn test_applied_change_without_version_is_published() {
        let f = fixture();
        seed_table(&f);
        let job = DdlJob::add_column(1, 10, ColumnInfo::new("email", "TEXT", true)).unwrap();
        let (mut session, mut job) = submit(&f, job);

        // Worker stopped after the catalog write, before a version was stored.
        job.state = JobState::Running;
        job.catalog_written = true;
        f.ctx
            .collaborators
            .job_table
            .update_job(&mut *session, &job)
            .unwrap();
        let mut table = f.cluster.catalog.table(1, 10).unwrap().unwrap();
        table.columns.push(ColumnInfo::new("email", "TEXT", true));
        f.cluster.catalog.update_table(1, &table).unwrap();

        let mut reloaded = stored(&f, &mut session, job.id);
        let version = f.worker.handle_job_table(&mut *session, &mut reloaded).unwrap();
        assert_eq!(version, 1);
        assert_eq!(reloaded.state, JobState::Done);
        assert!(reloaded.error.is_none());
        assert_eq!(f.cluster.catalog.table(1, 10).unwrap().unwrap().columns.len(), 2);
        assert_eq!(
            f.cluster.catalog.schema_diff(1).unwrap().unwrap().action,
            ActionType::AddColumn
        );
    }

    #[test]
    fn test_store_outage_before_catalog_write_is_retried() {
        let f = fixture();
        seed_table(&f);
        let job = DdlJob::add_column(1, 10, ColumnInfo::new("email", "TEXT", true)).unwrap();
        let (mut session, mut job) = submit(&f, job);
        job.state = JobState::Running;
        f.ctx
            .collaborators
            .job_table
            .update_job(&mut *session, &job)
            .unwrap();

        f.cluster.job_table.inject_failures(10);
        let err = f.worker.handle_job_table(&mut *session, &mut job).unwrap_err();
        assert!(err.is_retryable());
        assert!(f.cluster.catalog.table(1, 10).unwrap().unwrap().column("email").is_none());
        f.cluster.job_table.inject_failures(0);

        let mut reloaded = stored(&f, &mut session, job.id);
        assert_eq!(reloaded.state, JobState::Running);
        let version = f.worker.handle_job_table(&mut *session, &mut reloaded).unwrap();
        assert_eq!(version, 1);
        assert_eq!(reloaded.state, JobState::Done);
        assert!(reloaded.error.is_none());
    }
}
