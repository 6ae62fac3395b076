//! Owner-side job dispatch.
//!
//! Pending jobs are loaded under a mutex, each handed to a pooled worker and
//! executed on the job executor. A job id is never held by two workers.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use parking_lot::Mutex;

use ddl_core::metrics::{DDL_JOB_RUN, HANDLE_JOB_DONE, LOAD_DDL_JOBS};
use ddl_core::retry::retry_transient;
use ddl_core::store::{Session, ADDING_DDL_JOB_KEY};
use ddl_core::{DdlError, DdlJob, ErrorKind, JobState};

use crate::context::DdlContext;
use crate::event_source::JobEventSource;
use crate::sync::{Convergence, SchemaSyncer};
use crate::watch::spawn_watch;
use crate::worker_pool::{JobWorkerPool, PooledWorker};
use crate::Result;

pub struct DispatchLoop {
    ctx: Arc<DdlContext>,
    pool: Arc<JobWorkerPool>,
    syncer: Arc<SchemaSyncer>,
    events: Arc<JobEventSource>,
    load_lock: Mutex<()>,
    /// Jobs in flight on this node, one executor thread each. Twice the
    /// worker count, since metadata-lock waits run without a worker.
    job_slots: usize,
    #[cfg(feature = "parallel")]
    executor: rayon::ThreadPool,
}

impl DispatchLoop {
    pub fn new(
        ctx: Arc<DdlContext>,
        pool: Arc<JobWorkerPool>,
        syncer: Arc<SchemaSyncer>,
        events: Arc<JobEventSource>,
    ) -> Result<Arc<Self>> {
        let job_slots = ctx.config.worker_pool_size.max(1) * 2;
        #[cfg(feature = "parallel")]
        let executor = rayon::ThreadPoolBuilder::new()
            .num_threads(job_slots)
            .thread_name(|i| format!("ddl-worker-{}", i))
            .build()
            .map_err(|e| DdlError::Startup(format!("job executor: {}", e)))?;

        Ok(Arc::new(Self {
            ctx,
            pool,
            syncer,
            events,
            load_lock: Mutex::new(()),
            job_slots,
            #[cfg(feature = "parallel")]
            executor,
        }))
    }

    /// Spawns the scheduler: once this node owns DDL it watches the job key
    /// and runs a backstop tick at a fixed delay.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let dispatch = Arc::clone(self);
        thread::spawn(move || dispatch.schedule())
    }

    fn schedule(self: Arc<Self>) {
        let ctx = Arc::clone(&self.ctx);
        while !ctx.is_owner() {
            if !ctx.shutdown.sleep(ctx.config.owner_wait_interval()) {
                return;
            }
        }
        tracing::info!("Node {} owns DDL, starting job dispatch", ctx.node_id);

        let watch = {
            let dispatch = Arc::downgrade(&self);
            spawn_watch(Arc::clone(&ctx), ADDING_DDL_JOB_KEY.to_string(), move |_| {
                if let Some(dispatch) = dispatch.upgrade() {
                    if dispatch.ctx.is_owner() {
                        dispatch.load_and_run();
                    }
                }
            })
        };

        if ctx.shutdown.sleep(ctx.config.schedule_initial_delay()) {
            loop {
                self.load_and_run();
                if !ctx.shutdown.sleep(ctx.config.schedule_interval()) {
                    break;
                }
            }
        }
        if watch.join().is_err() {
            tracing::error!("Job key watch thread panicked");
        }
        tracing::info!("Job dispatch stopped on node {}", ctx.node_id);
    }

    /// Loads runnable jobs and hands each to a worker.
    ///
    /// On a non-owner this only flags a resync for the next owned run.
    pub fn load_and_run(self: &Arc<Self>) {
        let ctx = &self.ctx;
        if !ctx.is_owner() {
            ctx.sync_tracker.set_once(true);
            ctx.shutdown.sleep(ctx.config.owner_wait_interval());
            return;
        }

        let _guard = self.load_lock.lock();
        if let Err(e) = self.load_and_dispatch() {
            match e.kind() {
                ErrorKind::Shutdown => tracing::debug!("Job dispatch interrupted by shutdown"),
                _ => tracing::warn!("Failed to dispatch DDL jobs: {}", e),
            }
        }
    }

    fn load_and_dispatch(self: &Arc<Self>) -> Result<()> {
        let ctx = &self.ctx;
        let start = Instant::now();
        let jobs = {
            let mut session = ctx.session()?;
            ctx.collaborators.job_table.load_pending_jobs(&mut *session)?
        };
        ctx.collaborators
            .metrics
            .record_timer(LOAD_DDL_JOBS, start.elapsed());

        for job in jobs {
            if ctx.running_jobs.contains(job.id) {
                tracing::debug!("Job {} is already running", job.id);
                continue;
            }
            if ctx.running_jobs.len() >= self.job_slots {
                tracing::debug!(
                    "All {} job slots busy, job {} waits for the next pass",
                    self.job_slots,
                    job.id
                );
                break;
            }
            ctx.ensure_owner()?;
            let worker = self.pool.borrow()?;
            if !ctx.running_jobs.try_insert(job.id) {
                continue;
            }
            self.deliver(job, worker);
        }
        Ok(())
    }

    fn deliver(self: &Arc<Self>, job: DdlJob, worker: PooledWorker) {
        let dispatch = Arc::clone(self);
        #[cfg(feature = "parallel")]
        {
            self.executor.spawn(move || dispatch.run_job(job, worker));
        }
        #[cfg(not(feature = "parallel"))]
        {
            thread::spawn(move || dispatch.run_job(job, worker));
        }
    }

    fn run_job(&self, job: DdlJob, worker: PooledWorker) {
        let job_id = job.id;
        let start = Instant::now();
        tracing::debug!("Worker {} picked up job {}", worker.id(), job_id);

        let result = std::panic::catch_unwind(AssertUnwindSafe(|| self.drive(job, worker)));
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => match e.kind() {
                ErrorKind::Shutdown => tracing::debug!("Job {} interrupted by shutdown", job_id),
                ErrorKind::Invariant => tracing::error!("Job {} run abandoned: {}", job_id, e),
                _ => tracing::warn!("Job {} will be retried: {}", job_id, e),
            },
            Err(panic) => {
                let panic_msg = if let Some(msg) = panic.downcast_ref::<&str>() {
                    msg.to_string()
                } else if let Some(msg) = panic.downcast_ref::<String>() {
                    msg.clone()
                } else {
                    "unknown panic".to_string()
                };
                tracing::error!("Job {} panicked: {}", job_id, panic_msg);
            }
        }

        self.cleanup(job_id, start);
    }

    /// One pass over a job: resync, advance, converge, finalize.
    ///
    /// The worker goes back to the pool as soon as the job no longer needs it.
    fn drive(&self, mut job: DdlJob, worker: PooledWorker) -> Result<()> {
        let ctx = &self.ctx;
        let job_table = &ctx.collaborators.job_table;
        let mut session = ctx.session()?;

        if !ctx.sync_tracker.is_synced(job.id) || ctx.sync_tracker.once() {
            match self.syncer.convergence() {
                Convergence::MetadataLock => {
                    if let Some(version) = job_table.mdl_version(&mut *session, job.id)? {
                        drop(worker);
                        self.syncer.wait_schema_synced(job.id, version)?;
                        ctx.sync_tracker.mark_synced(job.id);
                        return Ok(());
                    }
                }
                Convergence::Lease if job.is_in_flight() => {
                    let version = ctx
                        .collaborators
                        .catalog
                        .schema_version_with_non_empty_diff()?;
                    if let Err(e) = self.syncer.wait_schema_synced(job.id, version) {
                        drop(worker);
                        tracing::error!(
                            "Job {} resync on schema version {} failed: {}",
                            job.id,
                            version,
                            e
                        );
                        ctx.shutdown.sleep(ctx.config.owner_wait_interval());
                        return Ok(());
                    }
                }
                Convergence::Lease => {}
            }
            ctx.sync_tracker.set_once(false);
        }

        let version = worker.handle_job_table(&mut *session, &mut job)?;
        if job.is_rollback_done() {
            drop(worker);
            return self.finalize(&mut *session, job);
        }

        let mut worker = Some(worker);
        if self.syncer.convergence() == Convergence::MetadataLock {
            worker.take();
        }
        self.syncer
            .wait_schema_changed(&mut *session, &mut job, version)?;
        ctx.sync_tracker.mark_synced(job.id);
        drop(worker);
        self.finalize(&mut *session, job)
    }

    /// Moves a finished job into the history and wakes queued successors.
    fn finalize(&self, session: &mut dyn Session, mut job: DdlJob) -> Result<()> {
        let ctx = &self.ctx;
        let start = Instant::now();
        if job.is_done() {
            job.state = JobState::Synced;
        }
        ctx.ensure_owner()?;
        let job_table = &ctx.collaborators.job_table;
        retry_transient(
            || job_table.finish_job(&mut *session, &job),
            ctx.config.store_max_retries,
            ctx.config.store_retry_delay_ms,
            "finish ddl job",
        )?;
        ctx.collaborators
            .metrics
            .record_timer(HANDLE_JOB_DONE, start.elapsed());
        ctx.sync_tracker.forget(job.id);
        tracing::info!(
            "Job {} ({}) finished as {:?} at schema version {}",
            job.id,
            job.action,
            job.state,
            job.schema_version
        );

        if let Err(e) = self.events.notify_new_job() {
            tracing::debug!("Skipped new-job notification after job {}: {}", job.id, e);
        }
        Ok(())
    }

    fn cleanup(&self, job_id: i64, start: Instant) {
        let ctx = &self.ctx;
        // A deposed node leaves the job's bookkeeping to the new owner.
        if ctx.is_owner() {
            self.clean_mdl_state(job_id);
        }
        ctx.running_jobs.remove(job_id);
        ctx.collaborators
            .metrics
            .record_timer(DDL_JOB_RUN, start.elapsed());
        tracing::info!("Job {} run ended after {:?}", job_id, start.elapsed());
    }

    fn clean_mdl_state(&self, job_id: i64) {
        let ctx = &self.ctx;
        match ctx.session() {
            Ok(mut session) => {
                if let Err(e) = ctx
                    .collaborators
                    .job_table
                    .clean_mdl_info(&mut *session, job_id)
                {
                    tracing::warn!("Failed to clean MDL info of job {}: {}", job_id, e);
                }
            }
            Err(e) => tracing::warn!("No session to clean MDL info of job {}: {}", job_id, e),
        }
        if self.syncer.convergence() == Convergence::MetadataLock {
            if let Err(e) = self.syncer.clean_job_acks(job_id) {
                tracing::warn!("Failed to clean acknowledgments of job {}: {}", job_id, e);
            }
        }
    }
}
