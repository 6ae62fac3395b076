//! Schema convergence barrier.
//!
//! After a job publishes a new schema version the owner waits until every
//! registered node has caught up before the job may be declared synced.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use ddl_core::config::SyncStrategyKind;
use ddl_core::error::LOCK_WAIT_TIMEOUT_MSG;
use ddl_core::job::MdlInfo;
use ddl_core::metrics::MDL_WAIT_CHANGED;
use ddl_core::retry::retry_transient;
use ddl_core::store::{
    job_ack_prefix, self_version_key, Session, ALL_SCHEMA_VERSIONS_PREFIX,
    GLOBAL_SCHEMA_VERSION_KEY,
};
use ddl_core::{DdlError, DdlJob};

use crate::context::DdlContext;
use crate::diff_gc::DiffGcQueue;
use crate::Result;

/// How the owner decides that the cluster converged on a version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convergence {
    /// Every node's self-version key reached the version.
    Lease,
    /// Every node acknowledged the job under its per-job key.
    MetadataLock,
}

impl From<SyncStrategyKind> for Convergence {
    fn from(kind: SyncStrategyKind) -> Self {
        match kind {
            SyncStrategyKind::Lease => Convergence::Lease,
            SyncStrategyKind::MetadataLock => Convergence::MetadataLock,
        }
    }
}

pub struct SchemaSyncer {
    ctx: Arc<DdlContext>,
    convergence: Convergence,
    diff_gc: Arc<DiffGcQueue>,
}

impl SchemaSyncer {
    pub fn new(ctx: Arc<DdlContext>, diff_gc: Arc<DiffGcQueue>) -> Arc<Self> {
        let convergence = Convergence::from(ctx.config.sync_strategy);
        Arc::new(Self {
            ctx,
            convergence,
            diff_gc,
        })
    }

    pub fn convergence(&self) -> Convergence {
        self.convergence
    }

    /// Publishes the schema version this node has loaded.
    ///
    /// Refused once shutdown started so a stopped node stays deregistered.
    pub fn update_self_version(&self, version: i64) -> Result<()> {
        if self.ctx.shutdown.is_triggered() {
            return Err(DdlError::Shutdown);
        }
        self.ctx
            .collaborators
            .coordination
            .put(&self_version_key(&self.ctx.node_id), version)
    }

    /// Deregisters this node; called on shutdown.
    pub fn remove_self_version_path(&self) -> Result<()> {
        self.ctx
            .collaborators
            .coordination
            .delete(&self_version_key(&self.ctx.node_id))
    }

    /// Announces `version` as the newest schema version.
    pub fn owner_update_global_version(&self, version: i64) -> Result<()> {
        self.ctx
            .collaborators
            .coordination
            .put(GLOBAL_SCHEMA_VERSION_KEY, version)
    }

    /// Drops every acknowledgment recorded for `job_id`.
    pub fn clean_job_acks(&self, job_id: i64) -> Result<()> {
        self.ctx
            .collaborators
            .coordination
            .delete_prefix(&job_ack_prefix(job_id))
            .map(|_| ())
    }

    /// Waits until every registered node reached `version`, bounded by twice
    /// the lease.
    ///
    /// Coordination errors inside the window are retried on the next poll.
    /// Losing ownership ends the wait with `NotOwner`.
    pub fn owner_check_all_versions(&self, job_id: i64, version: i64) -> Result<()> {
        let ctx = &self.ctx;
        let deadline = Instant::now() + ctx.config.sync_wait_timeout();
        loop {
            ctx.ensure_owner()?;
            match self.converged(job_id, version) {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(e) if e.is_retryable() => {
                    tracing::debug!("Convergence check for job {} failed: {}", job_id, e);
                }
                Err(e) => return Err(e),
            }
            if Instant::now() >= deadline {
                tracing::warn!(
                    "Job {} timed out waiting for schema version {} ({:?})",
                    job_id,
                    version,
                    self.convergence
                );
                return Err(DdlError::LockWaitTimeout);
            }
            if !ctx.shutdown.sleep(ctx.config.sync_poll_interval()) {
                return Err(DdlError::Shutdown);
            }
        }
    }

    fn converged(&self, job_id: i64, version: i64) -> Result<bool> {
        let coordination = &self.ctx.collaborators.coordination;
        let members = coordination.scan_prefix(ALL_SCHEMA_VERSIONS_PREFIX)?;
        match self.convergence {
            Convergence::Lease => Ok(members.iter().all(|(_, v)| *v >= version)),
            Convergence::MetadataLock => {
                let ack_prefix = job_ack_prefix(job_id);
                let acks: HashMap<String, i64> = coordination
                    .scan_prefix(&ack_prefix)?
                    .into_iter()
                    .filter_map(|(key, v)| Some((key.strip_prefix(&ack_prefix)?.to_string(), v)))
                    .collect();
                Ok(members.iter().all(|(key, _)| {
                    let node = key.trim_start_matches(ALL_SCHEMA_VERSIONS_PREFIX);
                    acks.get(node).is_some_and(|v| *v >= version)
                }))
            }
        }
    }

    /// Publishes `version` for `job` and waits for the cluster to converge.
    ///
    /// A lease timeout is persisted as the job's error; the job itself stays
    /// done so a later run re-drives the barrier.
    pub fn wait_schema_changed(
        &self,
        session: &mut dyn Session,
        job: &mut DdlJob,
        version: i64,
    ) -> Result<()> {
        if version == 0 {
            tracing::error!("Schema version doesn't change, job {}", job.id);
            return Err(DdlError::SchemaVersionUnchanged { job_id: job.id });
        }

        let ctx = &self.ctx;
        let start = Instant::now();
        match self.convergence {
            Convergence::Lease => {
                ctx.ensure_owner()?;
                self.owner_update_global_version(version)?;
                if let Err(e) = self.owner_check_all_versions(job.id, version) {
                    if e == DdlError::LockWaitTimeout {
                        ctx.ensure_owner()?;
                        job.encode_error(LOCK_WAIT_TIMEOUT_MSG);
                        let job_table = &ctx.collaborators.job_table;
                        retry_transient(
                            || job_table.update_job(&mut *session, job),
                            ctx.config.store_max_retries,
                            ctx.config.store_retry_delay_ms,
                            "persist convergence timeout",
                        )?;
                    }
                    return Err(e);
                }
            }
            Convergence::MetadataLock => {
                let info = MdlInfo {
                    job_id: job.id,
                    version,
                    table_ids: job.involved_table_ids(),
                };
                ctx.ensure_owner()?;
                ctx.collaborators.job_table.set_mdl_info(session, &info)?;
                self.owner_update_global_version(version)?;
                self.owner_check_all_versions(job.id, version)?;
            }
        }

        ctx.ensure_owner()?;
        ctx.collaborators
            .metrics
            .record_timer(MDL_WAIT_CHANGED, start.elapsed());
        if ctx.config.delete_schema_diffs {
            self.diff_gc.enqueue(version);
        }
        tracing::info!(
            "Cluster converged on schema version {} for job {} in {:?}",
            version,
            job.id,
            start.elapsed()
        );
        Ok(())
    }

    /// Waits for convergence on an already published version.
    pub fn wait_schema_synced(&self, job_id: i64, version: i64) -> Result<()> {
        if version == 0 {
            return Ok(());
        }
        self.owner_check_all_versions(job_id, version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ddl_core::config::DdlConfig;
    use ddl_core::memory::InMemoryCluster;
    use ddl_core::store::{job_ack_key, CoordinationService};

    fn syncer(cluster: &InMemoryCluster, strategy: SyncStrategyKind) -> Arc<SchemaSyncer> {
        let config = DdlConfig {
            lease_ms: 50,
            sync_poll_interval_ms: 5,
            sync_strategy: strategy,
            ..Default::default()
        };
        let ctx = DdlContext::new("n1", config, cluster.node().collaborators);
        ctx.ownership.set_owner(true);
        let gc = DiffGcQueue::new(ctx.clone());
        SchemaSyncer::new(ctx, gc)
    }

    #[test]
    fn test_lease_waits_for_every_member() {
        let cluster = InMemoryCluster::new();
        let syncer = syncer(&cluster, SyncStrategyKind::Lease);
        syncer.update_self_version(3).unwrap();
        cluster.coordinator.put(&self_version_key("n2"), 2).unwrap();

        assert_eq!(
            syncer.owner_check_all_versions(1, 3),
            Err(DdlError::LockWaitTimeout)
        );
        cluster.coordinator.put(&self_version_key("n2"), 3).unwrap();
        assert!(syncer.owner_check_all_versions(1, 3).is_ok());
    }

    #[test]
    fn test_metadata_lock_needs_acks_from_all_members() {
        let cluster = InMemoryCluster::new();
        let syncer = syncer(&cluster, SyncStrategyKind::MetadataLock);
        assert_eq!(syncer.convergence(), Convergence::MetadataLock);
        syncer.update_self_version(3).unwrap();
        cluster.coordinator.put(&self_version_key("n2"), 3).unwrap();
        cluster.coordinator.put(&job_ack_key(7, "n1"), 3).unwrap();

        assert_eq!(
            syncer.owner_check_all_versions(7, 3),
            Err(DdlError::LockWaitTimeout)
        );
        cluster.coordinator.put(&job_ack_key(7, "n2"), 4).unwrap();
        assert!(syncer.owner_check_all_versions(7, 3).is_ok());

        syncer.clean_job_acks(7).unwrap();
        assert!(cluster
            .coordinator
            .scan_prefix(&job_ack_prefix(7))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_zero_version_is_an_invariant_error() {
        let cluster = InMemoryCluster::new();
        let syncer = syncer(&cluster, SyncStrategyKind::Lease);
        let mut session = syncer.ctx.session().unwrap();
        let mut job = DdlJob::drop_table(1, 10).unwrap();
        job.id = 5;

        let err = syncer
            .wait_schema_changed(&mut *session, &mut job, 0)
            .unwrap_err();
        assert_eq!(err, DdlError::SchemaVersionUnchanged { job_id: 5 });
        assert!(syncer.wait_schema_synced(5, 0).is_ok());
    }

    #[test]
    fn test_deposed_owner_stops_waiting() {
        let cluster = InMemoryCluster::new();
        let syncer = syncer(&cluster, SyncStrategyKind::Lease);
        cluster.coordinator.put(&self_version_key("n2"), 0).unwrap();
        syncer.ctx.ownership.set_owner(false);

        assert_eq!(
            syncer.owner_check_all_versions(1, 3),
            Err(DdlError::NotOwner)
        );

        let mut session = syncer.ctx.session().unwrap();
        let mut job = DdlJob::drop_table(1, 10).unwrap();
        job.id = 5;
        assert_eq!(
            syncer.wait_schema_changed(&mut *session, &mut job, 3),
            Err(DdlError::NotOwner)
        );
        assert!(job.error.is_none());
        assert_eq!(cluster.coordinator.get(GLOBAL_SCHEMA_VERSION_KEY).unwrap(), None);
    }

    #[test]
    fn test_remove_self_version_path() {
        let cluster = InMemoryCluster::new();
        let syncer = syncer(&cluster, SyncStrategyKind::Lease);
        syncer.update_self_version(1).unwrap();
        syncer.remove_self_version_path().unwrap();
        assert_eq!(cluster.coordinator.get(&self_version_key("n1")).unwrap(), None);
    }
}
