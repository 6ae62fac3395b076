//! Keeps the local schema cache in step with the durable catalog.

use std::sync::Arc;

use parking_lot::Mutex;

use ddl_core::schema::{SchemaDiff, SchemaSnapshot};
use ddl_core::{ActionType, DdlError};

use crate::context::DdlContext;
use crate::sync::SchemaSyncer;
use crate::Result;

/// Attempts before giving up on a catalog that keeps moving under the load.
const MAX_RELOAD_ATTEMPTS: u32 = 3;
/// Larger version gaps are rebuilt from scratch instead of patched.
const MAX_DIFF_SPAN: i64 = 100;

pub struct SchemaLoader {
    ctx: Arc<DdlContext>,
    syncer: Arc<SchemaSyncer>,
    reload_lock: Mutex<()>,
}

impl SchemaLoader {
    pub fn new(ctx: Arc<DdlContext>, syncer: Arc<SchemaSyncer>) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            syncer,
            reload_lock: Mutex::new(()),
        })
    }

    /// Brings the cache up to the catalog's schema version and publishes it
    /// as this node's self version.
    ///
    /// Returns the loaded version.
    pub fn reload(&self) -> Result<i64> {
        let _guard = self.reload_lock.lock();
        let catalog = &self.ctx.collaborators.catalog;
        let cache = &self.ctx.cache;

        for attempt in 1..=MAX_RELOAD_ATTEMPTS {
            let target = catalog.schema_version()?;
            let latest = cache.latest();
            if let Some(current) = latest.as_ref().filter(|s| s.version() >= target) {
                self.syncer.update_self_version(current.version())?;
                return Ok(current.version());
            }

            let snapshot = match &latest {
                Some(current) => match self.apply_diffs(current, target)? {
                    Some(patched) => patched,
                    None => self.full_load(target)?,
                },
                None => self.full_load(target)?,
            };

            if catalog.schema_version()? != target {
                tracing::debug!(
                    "Catalog moved past version {} during reload (attempt {})",
                    target,
                    attempt
                );
                continue;
            }

            let snapshot_ts = match self.ctx.collaborators.timestamps.next_timestamp() {
                Ok(ts) => ts,
                Err(e) => {
                    tracing::warn!("No snapshot timestamp for version {}: {}", target, e);
                    0
                }
            };
            cache.insert_with_ts(Arc::new(snapshot), snapshot_ts);
            self.syncer.update_self_version(target)?;
            tracing::info!(
                "Node {} loaded schema version {}",
                self.ctx.node_id,
                target
            );
            return Ok(target);
        }

        Err(DdlError::Store(format!(
            "schema version kept changing after {} reload attempts",
            MAX_RELOAD_ATTEMPTS
        )))
    }

    /// Builds a snapshot of the whole catalog.
    fn full_load(&self, version: i64) -> Result<SchemaSnapshot> {
        let catalog = &self.ctx.collaborators.catalog;
        let mut snapshot = SchemaSnapshot::new(version);
        for schema in catalog.schemas()? {
            let schema_id = schema.id;
            snapshot.put_schema(schema);
            for table in catalog.tables(schema_id)? {
                snapshot.put_table(schema_id, table);
            }
        }
        tracing::debug!(
            "Full schema load at version {}: {} tables",
            version,
            snapshot.table_count()
        );
        Ok(snapshot)
    }

    /// Patches `current` with the diffs up to `target`.
    ///
    /// `None` means the diffs cannot be used and a full load is needed.
    fn apply_diffs(
        &self,
        current: &SchemaSnapshot,
        target: i64,
    ) -> Result<Option<SchemaSnapshot>> {
        if target - current.version() > MAX_DIFF_SPAN {
            return Ok(None);
        }
        let catalog = &self.ctx.collaborators.catalog;
        let mut next = current.with_version(target);
        for version in current.version() + 1..=target {
            let Some(diff) = catalog.schema_diff(version)? else {
                tracing::debug!("Schema diff {} is gone, falling back to a full load", version);
                return Ok(None);
            };
            if diff.regenerate_schema_map {
                return Ok(None);
            }
            self.apply_diff(&mut next, &diff)?;
        }
        Ok(Some(next))
    }

    /// Re-reads the objects named by `diff` from the catalog.
    fn apply_diff(&self, snapshot: &mut SchemaSnapshot, diff: &SchemaDiff) -> Result<()> {
        let catalog = &self.ctx.collaborators.catalog;
        match diff.action {
            ActionType::CreateSchema => {
                if let Some(schema) = catalog.schema(diff.schema_id)? {
                    snapshot.put_schema(schema);
                }
            }
            ActionType::DropSchema => {
                snapshot.drop_schema(diff.schema_id);
            }
            ActionType::DropTable => {
                snapshot.drop_table(diff.table_id);
            }
            ActionType::CreateTables => {
                for opt in &diff.affected_opts {
                    self.refresh_table(snapshot, opt.schema_id, opt.table_id)?;
                }
            }
            _ => {
                if diff.old_table_id != 0 {
                    snapshot.drop_table(diff.old_table_id);
                }
                self.refresh_table(snapshot, diff.schema_id, diff.table_id)?;
            }
        }
        Ok(())
    }

    fn refresh_table(
        &self,
        snapshot: &mut SchemaSnapshot,
        schema_id: i64,
        table_id: i64,
    ) -> Result<()> {
        match self.ctx.collaborators.catalog.table(schema_id, table_id)? {
            Some(table) => {
                snapshot.put_table(schema_id, table);
            }
            // Dropped by a later job.
            None => {
                snapshot.drop_table(table_id);
            }
        }
        Ok(())
    }
}
