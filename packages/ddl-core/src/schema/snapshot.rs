//! Point-in-time catalog snapshots.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Number of hash buckets in the table-id index.
pub const TABLE_BUCKET_COUNT: i64 = 512;

/// Returns the bucket of the table-id index holding `table_id`.
pub fn bucket_idx(table_id: i64) -> u32 {
    table_id.rem_euclid(TABLE_BUCKET_COUNT) as u32
}

/// Normalizes an identifier the way catalog lookups compare them.
pub fn normalize_name(name: &str) -> String {
    name.to_uppercase()
}

/// Schema (database) metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaInfo {
    pub id: i64,
    pub name: String,
}

impl SchemaInfo {
    pub fn new(id: i64, name: &str) -> Self {
        Self {
            id,
            name: normalize_name(name),
        }
    }
}

/// Column definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub sql_type: String,
    #[serde(default)]
    pub nullable: bool,
}

impl ColumnInfo {
    pub fn new(name: &str, sql_type: &str, nullable: bool) -> Self {
        Self {
            name: normalize_name(name),
            sql_type: sql_type.to_string(),
            nullable,
        }
    }
}

/// Visibility state of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum IndexState {
    /// Being backfilled; not used by queries.
    WriteReorganization,
    /// Fully built.
    #[default]
    Public,
}

/// Index definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub id: i64,
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub primary: bool,
    #[serde(default)]
    pub state: IndexState,
}

/// Table definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    pub id: i64,
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    #[serde(default)]
    pub indexes: Vec<IndexInfo>,
}

impl TableInfo {
    pub fn new(id: i64, name: &str, columns: Vec<ColumnInfo>) -> Self {
        Self {
            id,
            name: normalize_name(name),
            columns,
            indexes: Vec::new(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        let name = normalize_name(name);
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn index(&self, name: &str) -> Option<&IndexInfo> {
        let name = normalize_name(name);
        self.indexes.iter().find(|i| i.name == name)
    }

    pub fn primary_key(&self) -> Option<&IndexInfo> {
        self.indexes.iter().find(|i| i.primary)
    }
}

/// Lightweight record of the table-id index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableInfoCache {
    pub table_id: i64,
    pub name: String,
    pub schema_id: i64,
    pub schema_name: String,
}

/// One schema and its tables keyed by table name.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaTables {
    pub info: SchemaInfo,
    pub tables: HashMap<String, Arc<TableInfo>>,
}

impl SchemaTables {
    pub fn new(info: SchemaInfo) -> Self {
        Self {
            info,
            tables: HashMap::new(),
        }
    }
}

/// Immutable view of the whole catalog at one schema version.
///
/// Published snapshots are shared as `Arc<SchemaSnapshot>` and never
/// mutated; followers derive a new one with [`SchemaSnapshot::with_version`]
/// and patch the copy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaSnapshot {
    version: i64,
    schemas: HashMap<String, SchemaTables>,
    table_buckets: HashMap<u32, Vec<TableInfoCache>>,
}

impl SchemaSnapshot {
    /// Creates an empty snapshot at `version`.
    pub fn new(version: i64) -> Self {
        Self {
            version,
            ..Default::default()
        }
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    /// Copy of this snapshot stamped with a new version.
    pub fn with_version(&self, version: i64) -> Self {
        let mut next = self.clone();
        next.version = version;
        next
    }

    pub fn schema(&self, name: &str) -> Option<&SchemaTables> {
        self.schemas.get(&normalize_name(name))
    }

    pub fn schema_by_id(&self, schema_id: i64) -> Option<&SchemaTables> {
        self.schemas.values().find(|s| s.info.id == schema_id)
    }

    pub fn schema_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.schemas.keys().cloned().collect();
        names.sort();
        names
    }

    /// Looks a table up by schema and table name.
    pub fn table(&self, schema_name: &str, table_name: &str) -> Option<&Arc<TableInfo>> {
        self.schema(schema_name)?
            .tables
            .get(&normalize_name(table_name))
    }

    /// Looks a table up through the table-id index.
    pub fn table_by_id(&self, table_id: i64) -> Option<&Arc<TableInfo>> {
        let entry = self
            .table_buckets
            .get(&bucket_idx(table_id))?
            .iter()
            .find(|t| t.table_id == table_id)?;
        self.schemas.get(&entry.schema_name)?.tables.get(&entry.name)
    }

    pub fn table_count(&self) -> usize {
        self.schemas.values().map(|s| s.tables.len()).sum()
    }

    /// Adds a schema, keeping its tables if it is already present.
    pub fn put_schema(&mut self, info: SchemaInfo) {
        if let Some(previous) = self.schema_by_id(info.id).map(|s| s.info.name.clone()) {
            if previous != info.name {
                if let Some(mut existing) = self.schemas.remove(&previous) {
                    existing.info = info.clone();
                    self.reindex_schema(&existing);
                    self.schemas.insert(info.name.clone(), existing);
                }
            }
            return;
        }
        self.schemas
            .insert(info.name.clone(), SchemaTables::new(info));
    }

    /// Removes a schema and all of its tables.
    pub fn drop_schema(&mut self, schema_id: i64) -> bool {
        let Some(name) = self.schema_by_id(schema_id).map(|s| s.info.name.clone()) else {
            return false;
        };
        if let Some(removed) = self.schemas.remove(&name) {
            for table in removed.tables.values() {
                self.unindex_table(table.id);
            }
        }
        true
    }

    /// Adds or replaces a table (matched by id) in the given schema.
    ///
    /// Returns false if the schema is not part of this snapshot.
    pub fn put_table(&mut self, schema_id: i64, table: TableInfo) -> bool {
        let Some(schema_name) = self.schema_by_id(schema_id).map(|s| s.info.name.clone()) else {
            return false;
        };
        self.drop_table(table.id);
        let cache = TableInfoCache {
            table_id: table.id,
            name: table.name.clone(),
            schema_id,
            schema_name: schema_name.clone(),
        };
        self.table_buckets
            .entry(bucket_idx(table.id))
            .or_default()
            .push(cache);
        if let Some(schema) = self.schemas.get_mut(&schema_name) {
            schema.tables.insert(table.name.clone(), Arc::new(table));
        }
        true
    }

    /// Removes a table by id from whichever schema holds it.
    pub fn drop_table(&mut self, table_id: i64) -> bool {
        let Some(entry) = self.unindex_table(table_id) else {
            return false;
        };
        if let Some(schema) = self.schemas.get_mut(&entry.schema_name) {
            schema.tables.remove(&entry.name);
        }
        true
    }

    fn unindex_table(&mut self, table_id: i64) -> Option<TableInfoCache> {
        let bucket = self.table_buckets.get_mut(&bucket_idx(table_id))?;
        let pos = bucket.iter().position(|t| t.table_id == table_id)?;
        let entry = bucket.swap_remove(pos);
        if bucket.is_empty() {
            self.table_buckets.remove(&bucket_idx(table_id));
        }
        Some(entry)
    }

    fn reindex_schema(&mut self, schema: &SchemaTables) {
        for bucket in self.table_buckets.values_mut() {
            for entry in bucket.iter_mut() {
                if entry.schema_id == schema.info.id {
                    entry.schema_name = schema.info.name.clone();
                }
            }
        }
    }
}
