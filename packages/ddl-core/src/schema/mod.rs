//! Schema snapshot and diff model.

pub mod action;
pub mod diff;
pub mod snapshot;

pub use action::ActionType;
pub use diff::{AffectedOption, SchemaDiff};
pub use snapshot::{
    bucket_idx, normalize_name, ColumnInfo, IndexInfo, IndexState, SchemaInfo, SchemaSnapshot,
    SchemaTables, TableInfo, TableInfoCache, TABLE_BUCKET_COUNT,
};
