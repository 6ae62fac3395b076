//! Delta between two consecutive schema versions.

use serde::{Deserialize, Serialize};

use super::action::ActionType;

/// Table touched by a multi-table operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffectedOption {
    pub schema_id: i64,
    pub table_id: i64,
    #[serde(default)]
    pub old_schema_id: i64,
    #[serde(default)]
    pub old_table_id: i64,
}

/// What one successfully applied job changed.
///
/// Followers patch their newest snapshot with the diffs between their
/// version and the catalog's instead of rebuilding from scratch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDiff {
    pub version: i64,
    pub action: ActionType,
    pub schema_id: i64,
    #[serde(default)]
    pub table_id: i64,
    #[serde(default)]
    pub old_table_id: i64,
    #[serde(default)]
    pub old_schema_id: i64,
    #[serde(default)]
    pub table_name: String,
    /// Followers must rebuild the schema map instead of patching it.
    #[serde(default)]
    pub regenerate_schema_map: bool,
    #[serde(default)]
    pub affected_opts: Vec<AffectedOption>,
}

impl SchemaDiff {
    /// Diff of a single-object change; the version is assigned on publish.
    pub fn new(action: ActionType, schema_id: i64, table_id: i64) -> Self {
        Self {
            version: 0,
            action,
            schema_id,
            table_id,
            old_table_id: 0,
            old_schema_id: 0,
            table_name: String::new(),
            regenerate_schema_map: false,
            affected_opts: Vec::new(),
        }
    }
}
