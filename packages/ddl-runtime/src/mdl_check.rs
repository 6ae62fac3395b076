//! Metadata-lock acknowledgments published by every node.

use std::sync::Arc;

use ddl_core::store::job_ack_key;

use crate::context::DdlContext;
use crate::Result;

/// Acknowledges jobs waiting on the metadata-lock barrier once this node
/// serves their version and no local transaction still locks an affected
/// table at an older one.
pub struct MdlChecker {
    ctx: Arc<DdlContext>,
}

impl MdlChecker {
    pub fn new(ctx: Arc<DdlContext>) -> Self {
        Self { ctx }
    }

    /// Returns the number of acknowledgments written.
    pub fn check(&self) -> Result<usize> {
        let ctx = &self.ctx;
        let infos = {
            let mut session = ctx.session()?;
            ctx.collaborators.job_table.mdl_infos(&mut *session)?
        };
        let loaded = ctx.cache.latest_version();
        let coordination = &ctx.collaborators.coordination;

        let mut acked = 0;
        for info in infos {
            if loaded < info.version {
                continue;
            }
            if ctx
                .collaborators
                .locks
                .holds_stale_lock(&info.table_ids, info.version)
            {
                tracing::debug!(
                    "Job {} waits for local transactions on tables {:?}",
                    info.job_id,
                    info.table_ids
                );
                continue;
            }
            let key = job_ack_key(info.job_id, &ctx.node_id);
            if coordination.get(&key)?.is_some_and(|v| v >= info.version) {
                continue;
            }
            coordination.put(&key, info.version)?;
            acked += 1;
        }
        Ok(acked)
    }
}
