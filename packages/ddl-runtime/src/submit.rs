//! Job submission from any node.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ddl_core::retry::retry_transient;
use ddl_core::store::ADDING_DDL_JOB_KEY;
use ddl_core::{DdlError, DdlJob};

use crate::context::DdlContext;
use crate::event_source::JobEventSource;
use crate::Result;

pub struct JobSubmitter {
    ctx: Arc<DdlContext>,
    events: Arc<JobEventSource>,
}

impl JobSubmitter {
    pub fn new(ctx: Arc<DdlContext>, events: Arc<JobEventSource>) -> Self {
        Self { ctx, events }
    }

    /// Persists `job` and wakes the owner. Returns the assigned job id.
    pub fn submit(&self, mut job: DdlJob) -> Result<i64> {
        let ctx = &self.ctx;
        let job_id = {
            let mut session = ctx.session()?;
            let job_table = &ctx.collaborators.job_table;
            retry_transient(
                || job_table.insert_job(&mut *session, &mut job),
                ctx.config.store_max_retries,
                ctx.config.store_retry_delay_ms,
                "insert ddl job",
            )?
        };
        tracing::info!(
            "Node {} submitted job {} ({})",
            ctx.node_id,
            job_id,
            job.action
        );

        if let Err(e) = ctx
            .collaborators
            .coordination
            .put(ADDING_DDL_JOB_KEY, job_id)
        {
            tracing::warn!("Failed to announce job {}: {}", job_id, e);
        }
        if let Err(e) = self.events.notify_new_job() {
            tracing::warn!("Failed to queue new-job event for job {}: {}", job_id, e);
        }
        Ok(job_id)
    }

    /// Looks a job up in the queue, then in the history.
    pub fn job(&self, job_id: i64) -> Result<Option<DdlJob>> {
        let mut session = self.ctx.session()?;
        let job_table = &self.ctx.collaborators.job_table;
        match job_table.job(&mut *session, job_id)? {
            Some(job) => Ok(Some(job)),
            None => job_table.history_job(&mut *session, job_id),
        }
    }

    /// Waits until the job reaches the history.
    ///
    /// Returns `None` if it is still queued after `timeout`.
    pub fn wait_job(&self, job_id: i64, timeout: Duration) -> Result<Option<DdlJob>> {
        let ctx = &self.ctx;
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut session = ctx.session()?;
                if let Some(job) = ctx
                    .collaborators
                    .job_table
                    .history_job(&mut *session, job_id)?
                {
                    return Ok(Some(job));
                }
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            if !ctx.shutdown.sleep(ctx.config.sync_poll_interval()) {
                return Err(DdlError::Shutdown);
            }
        }
    }
}
