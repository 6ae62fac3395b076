//! Wiring of one node's DDL components.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

use ddl_core::store::{WatchEvent, GLOBAL_SCHEMA_VERSION_KEY};
use ddl_core::{DdlJob, VersionedSchemaCache};

use crate::context::DdlContext;
use crate::diff_gc::DiffGcQueue;
use crate::dispatch::DispatchLoop;
use crate::event_source::JobEventSource;
use crate::loader::SchemaLoader;
use crate::mdl_check::MdlChecker;
use crate::submit::JobSubmitter;
use crate::sync::{Convergence, SchemaSyncer};
use crate::watch::{spawn_ticker, spawn_watch};
use crate::worker_pool::JobWorkerPool;
use crate::Result;

/// Point-in-time view of a node.
#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub node_id: String,
    pub owner: bool,
    pub schema_version: i64,
    pub cached_versions: Vec<i64>,
    pub running_jobs: usize,
    pub workers_in_use: usize,
    pub pending_job_events: usize,
    pub pending_diff_gc: usize,
}

pub struct DdlNode;

impl DdlNode {
    /// Starts every background loop of the node described by `ctx`.
    ///
    /// Ownership is left to the caller (`ctx.ownership`); a node that never
    /// becomes owner still refreshes its schema and acknowledges versions.
    pub fn start(ctx: Arc<DdlContext>) -> Result<NodeHandle> {
        let diff_gc = DiffGcQueue::new(Arc::clone(&ctx));
        let syncer = SchemaSyncer::new(Arc::clone(&ctx), Arc::clone(&diff_gc));
        let loader = SchemaLoader::new(Arc::clone(&ctx), Arc::clone(&syncer));
        if let Err(e) = loader.reload() {
            tracing::warn!("Initial schema load on node {} failed: {}", ctx.node_id, e);
        }

        let events = JobEventSource::new(Arc::clone(&ctx));
        let pool = JobWorkerPool::new(Arc::clone(&ctx));
        let dispatch = DispatchLoop::new(
            Arc::clone(&ctx),
            Arc::clone(&pool),
            Arc::clone(&syncer),
            Arc::clone(&events),
        )?;

        {
            let dispatch = Arc::downgrade(&dispatch);
            events.add_listener(move |_| {
                if let Some(dispatch) = dispatch.upgrade() {
                    dispatch.load_and_run();
                }
                Ok(())
            });
        }
        {
            let loader = Arc::clone(&loader);
            let checker = match syncer.convergence() {
                Convergence::MetadataLock => Some(MdlChecker::new(Arc::clone(&ctx))),
                Convergence::Lease => None,
            };
            events.add_version_check_listener(move |_| {
                loader.reload()?;
                if let Some(checker) = &checker {
                    checker.check()?;
                }
                Ok(())
            });
        }

        let mut threads = events.start();
        threads.push(diff_gc.start());
        threads.push(dispatch.start());
        {
            let events = Arc::clone(&events);
            threads.push(spawn_watch(
                Arc::clone(&ctx),
                GLOBAL_SCHEMA_VERSION_KEY.to_string(),
                move |event| {
                    if let WatchEvent::Put(version) = event {
                        if let Err(e) = events.notify_version_check(version) {
                            tracing::debug!("Dropped version check for {}: {}", version, e);
                        }
                    }
                },
            ));
        }
        {
            let events = Arc::clone(&events);
            threads.push(spawn_ticker(
                Arc::clone(&ctx),
                ctx.config.version_check_interval(),
                move || {
                    if events.pending_version_checks() == 0 {
                        if let Err(e) = events.notify_version_check(0) {
                            tracing::debug!("Dropped periodic version check: {}", e);
                        }
                    }
                },
            ));
        }

        tracing::info!(
            "DDL node {} started ({:?} convergence, {} workers)",
            ctx.node_id,
            syncer.convergence(),
            ctx.config.worker_pool_size
        );

        Ok(NodeHandle {
            submitter: JobSubmitter::new(Arc::clone(&ctx), Arc::clone(&events)),
            ctx,
            loader,
            syncer,
            pool,
            events,
            diff_gc,
            dispatch,
            threads: Mutex::new(threads),
        })
    }
}

/// Running node; stop it with [`NodeHandle::shutdown`].
pub struct NodeHandle {
    ctx: Arc<DdlContext>,
    submitter: JobSubmitter,
    loader: Arc<SchemaLoader>,
    syncer: Arc<SchemaSyncer>,
    pool: Arc<JobWorkerPool>,
    events: Arc<JobEventSource>,
    diff_gc: Arc<DiffGcQueue>,
    dispatch: Arc<DispatchLoop>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl NodeHandle {
    pub fn submit(&self, job: DdlJob) -> Result<i64> {
        self.submitter.submit(job)
    }

    pub fn job(&self, job_id: i64) -> Result<Option<DdlJob>> {
        self.submitter.job(job_id)
    }

    /// Waits until the job is moved into the history.
    pub fn wait_job(&self, job_id: i64, timeout: Duration) -> Result<Option<DdlJob>> {
        self.submitter.wait_job(job_id, timeout)
    }

    pub fn context(&self) -> &Arc<DdlContext> {
        &self.ctx
    }

    pub fn cache(&self) -> &Arc<VersionedSchemaCache> {
        &self.ctx.cache
    }

    /// Forces a schema refresh outside the version-check loop.
    pub fn reload(&self) -> Result<i64> {
        self.loader.reload()
    }

    /// Runs one dispatch pass immediately.
    pub fn dispatch_now(&self) {
        self.dispatch.load_and_run();
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            node_id: self.ctx.node_id.clone(),
            owner: self.ctx.is_owner(),
            schema_version: self.ctx.cache.latest_version(),
            cached_versions: self.ctx.cache.versions(),
            running_jobs: self.ctx.running_jobs.len(),
            workers_in_use: self.pool.in_use(),
            pending_job_events: self.events.pending_jobs(),
            pending_diff_gc: self.diff_gc.pending(),
        }
    }

    /// Stops every loop, joins its threads, then deregisters the node.
    ///
    /// The self-version key is removed last so that a reload still in flight
    /// cannot register the node again.
    pub fn shutdown(&self) {
        self.ctx.shutdown.trigger();
        let threads: Vec<JoinHandle<()>> = self.threads.lock().drain(..).collect();
        for handle in threads {
            if handle.join().is_err() {
                tracing::error!("A background thread of node {} panicked", self.ctx.node_id);
            }
        }
        if let Err(e) = self.syncer.remove_self_version_path() {
            tracing::warn!(
                "Failed to remove self version of node {}: {}",
                self.ctx.node_id,
                e
            );
        }
        tracing::info!("DDL node {} stopped", self.ctx.node_id);
    }
}
