use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{DdlError, Result};
use crate::schema::{normalize_name, SchemaDiff, SchemaInfo, TableInfo};
use crate::store::CatalogStore;

#[derive(Debug)]
struct CatalogState {
    version: i64,
    next_global_id: i64,
    schemas: BTreeMap<i64, SchemaInfo>,
    /// schema id -> table id -> table
    tables: BTreeMap<i64, BTreeMap<i64, TableInfo>>,
    diffs: BTreeMap<i64, SchemaDiff>,
}

/// Catalog held in process memory.
#[derive(Debug)]
pub struct MemoryCatalog {
    state: Mutex<CatalogState>,
    /// Number of upcoming calls that fail with a transient store error.
    failures: AtomicU32,
}

impl Default for MemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CatalogState {
                version: 0,
                next_global_id: 100,
                schemas: BTreeMap::new(),
                tables: BTreeMap::new(),
                diffs: BTreeMap::new(),
            }),
            failures: AtomicU32::new(0),
        }
    }

    /// Makes the next `count` calls fail with `DdlError::Store`.
    pub fn inject_failures(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Versions that still have a recorded diff, ascending.
    pub fn diff_versions(&self) -> Vec<i64> {
        self.lock().diffs.keys().copied().collect()
    }

    /// Overrides the current schema version.
    pub fn set_schema_version(&self, version: i64) {
        self.lock().version = version;
    }

    fn lock(&self) -> MutexGuard<'_, CatalogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> Result<MutexGuard<'_, CatalogState>> {
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(DdlError::Store("injected catalog failure".into()));
        }
        Ok(self.lock())
    }
}

impl CatalogStore for MemoryCatalog {
    fn schema_version(&self) -> Result<i64> {
        Ok(self.state()?.version)
    }

    fn gen_schema_version(&self) -> Result<i64> {
        let mut state = self.state()?;
        state.version += 1;
        Ok(state.version)
    }

    fn gen_global_id(&self) -> Result<i64> {
        let mut state = self.state()?;
        state.next_global_id += 1;
        Ok(state.next_global_id)
    }

    fn set_schema_diff(&self, diff: &SchemaDiff) -> Result<()> {
        self.state()?.diffs.insert(diff.version, diff.clone());
        Ok(())
    }

    fn schema_diff(&self, version: i64) -> Result<Option<SchemaDiff>> {
        Ok(self.state()?.diffs.get(&version).cloned())
    }

    fn del_schema_diff(&self, upto: i64) -> Result<usize> {
        let mut state = self.state()?;
        let kept = state.diffs.split_off(&(upto + 1));
        let removed = state.diffs.len();
        state.diffs = kept;
        Ok(removed)
    }

    fn schema_version_with_non_empty_diff(&self) -> Result<i64> {
        let state = self.state()?;
        Ok(state.diffs.keys().next_back().copied().unwrap_or(0))
    }

    fn schemas(&self) -> Result<Vec<SchemaInfo>> {
        Ok(self.state()?.schemas.values().cloned().collect())
    }

    fn schema(&self, schema_id: i64) -> Result<Option<SchemaInfo>> {
        Ok(self.state()?.schemas.get(&schema_id).cloned())
    }

    fn create_schema(&self, schema: &SchemaInfo) -> Result<()> {
        let mut state = self.state()?;
        let name = normalize_name(&schema.name);
        if state.schemas.contains_key(&schema.id) || state.schemas.values().any(|s| s.name == name)
        {
            return Err(DdlError::SchemaExists(name));
        }
        state.schemas.insert(schema.id, schema.clone());
        state.tables.insert(schema.id, BTreeMap::new());
        Ok(())
    }

    fn drop_schema(&self, schema_id: i64) -> Result<()> {
        let mut state = self.state()?;
        if state.schemas.remove(&schema_id).is_none() {
            return Err(DdlError::SchemaNotFound(schema_id));
        }
        state.tables.remove(&schema_id);
        Ok(())
    }

    fn tables(&self, schema_id: i64) -> Result<Vec<TableInfo>> {
        let state = self.state()?;
        Ok(state
            .tables
            .get(&schema_id)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default())
    }

    fn table(&self, schema_id: i64, table_id: i64) -> Result<Option<TableInfo>> {
        let state = self.state()?;
        Ok(state
            .tables
            .get(&schema_id)
            .and_then(|t| t.get(&table_id))
            .cloned())
    }

    fn create_table(&self, schema_id: i64, table: &TableInfo) -> Result<()> {
        let mut state = self.state()?;
        let tables = state
            .tables
            .get_mut(&schema_id)
            .ok_or(DdlError::SchemaNotFound(schema_id))?;
        if tables.contains_key(&table.id) || tables.values().any(|t| t.name == table.name) {
            return Err(DdlError::TableExists {
                schema_id,
                table: table.name.clone(),
            });
        }
        tables.insert(table.id, table.clone());
        Ok(())
    }

    fn update_table(&self, schema_id: i64, table: &TableInfo) -> Result<()> {
        let mut state = self.state()?;
        let slot = state
            .tables
            .get_mut(&schema_id)
            .and_then(|t| t.get_mut(&table.id))
            .ok_or(DdlError::TableNotFound {
                schema_id,
                table_id: table.id,
            })?;
        *slot = table.clone();
        Ok(())
    }

    fn drop_table(&self, schema_id: i64, table_id: i64) -> Result<()> {
        let mut state = self.state()?;
        state
            .tables
            .get_mut(&schema_id)
            .and_then(|t| t.remove(&table_id))
            .map(|_| ())
            .ok_or(DdlError::TableNotFound {
                schema_id,
                table_id,
            })
    }
}
