//! DDL job model.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{DdlError, Result};
use crate::schema::{ActionType, ColumnInfo, IndexInfo, SchemaInfo, TableInfo};

/// Lifecycle of a DDL job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum JobState {
    /// Persisted, waiting for the owner to pick it up.
    #[default]
    Queueing,
    /// Claimed by a worker.
    Running,
    /// Catalog mutation failed; undoing partial effects.
    RollingBack,
    /// Partial effects undone.
    RollbackDone,
    /// Catalog mutation applied and a new schema version published.
    Done,
    /// Every node converged on the job's schema version.
    Synced,
}

/// A persisted unit of schema-change work.
///
/// The job table owns the durable record; an in-memory `DdlJob` is a
/// working copy held by exactly one worker at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DdlJob {
    pub id: i64,
    pub action: ActionType,
    pub schema_id: i64,
    #[serde(default)]
    pub table_id: i64,
    #[serde(default)]
    pub schema_name: String,
    #[serde(default)]
    pub table_name: String,
    /// Action-specific arguments, see the `*Args` types in this module.
    #[serde(default)]
    pub args: serde_json::Value,
    #[serde(default)]
    pub state: JobState,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_count: u32,
    #[serde(default)]
    pub need_reorg: bool,
    /// Timestamp taken when the job started running.
    #[serde(default)]
    pub start_ts: i64,
    /// Schema version published by this job (0 until done).
    #[serde(default)]
    pub schema_version: i64,
    /// Persisted before the first catalog write. A resumed job with this set
    /// accepts catalog state that already reflects its change.
    #[serde(default)]
    pub catalog_written: bool,
}

impl DdlJob {
    /// Creates a queued job. The id is assigned by the job table.
    pub fn new<A: Serialize>(
        action: ActionType,
        schema_id: i64,
        table_id: i64,
        args: &A,
    ) -> Result<Self> {
        Ok(Self {
            id: 0,
            action,
            schema_id,
            table_id,
            schema_name: String::new(),
            table_name: String::new(),
            args: serde_json::to_value(args)?,
            state: JobState::Queueing,
            error: None,
            error_count: 0,
            need_reorg: action.may_need_reorg(),
            start_ts: 0,
            schema_version: 0,
            catalog_written: false,
        })
    }

    pub fn create_schema(schema: SchemaInfo) -> Result<Self> {
        let mut job = Self::new(
            ActionType::CreateSchema,
            schema.id,
            0,
            &CreateSchemaArgs {
                schema: schema.clone(),
            },
        )?;
        job.schema_name = schema.name;
        Ok(job)
    }

    pub fn drop_schema(schema_id: i64) -> Result<Self> {
        Self::new(ActionType::DropSchema, schema_id, 0, &serde_json::Value::Null)
    }

    pub fn create_table(schema_id: i64, table: TableInfo) -> Result<Self> {
        let mut job = Self::new(
            ActionType::CreateTable,
            schema_id,
            table.id,
            &CreateTableArgs {
                table: table.clone(),
            },
        )?;
        job.table_name = table.name;
        Ok(job)
    }

    pub fn create_tables(schema_id: i64, tables: Vec<TableInfo>) -> Result<Self> {
        Self::new(
            ActionType::CreateTables,
            schema_id,
            0,
            &CreateTablesArgs { tables },
        )
    }

    pub fn drop_table(schema_id: i64, table_id: i64) -> Result<Self> {
        Self::new(ActionType::DropTable, schema_id, table_id, &serde_json::Value::Null)
    }

    pub fn truncate_table(schema_id: i64, table_id: i64, new_table_id: i64) -> Result<Self> {
        Self::new(
            ActionType::TruncateTable,
            schema_id,
            table_id,
            &TruncateTableArgs { new_table_id },
        )
    }

    pub fn add_column(schema_id: i64, table_id: i64, column: ColumnInfo) -> Result<Self> {
        Self::new(
            ActionType::AddColumn,
            schema_id,
            table_id,
            &ColumnArgs { column },
        )
    }

    pub fn modify_column(schema_id: i64, table_id: i64, column: ColumnInfo) -> Result<Self> {
        Self::new(
            ActionType::ModifyColumn,
            schema_id,
            table_id,
            &ColumnArgs { column },
        )
    }

    pub fn drop_column(schema_id: i64, table_id: i64, column: &str) -> Result<Self> {
        Self::new(
            ActionType::DropColumn,
            schema_id,
            table_id,
            &NameArgs {
                name: column.to_string(),
            },
        )
    }

    pub fn add_index(schema_id: i64, table_id: i64, index: IndexInfo) -> Result<Self> {
        let action = if index.primary {
            ActionType::AddPrimaryKey
        } else {
            ActionType::AddIndex
        };
        Self::new(action, schema_id, table_id, &IndexArgs { index })
    }

    pub fn drop_index(schema_id: i64, table_id: i64, index: &str) -> Result<Self> {
        Self::new(
            ActionType::DropIndex,
            schema_id,
            table_id,
            &NameArgs {
                name: index.to_string(),
            },
        )
    }

    /// Decodes the arguments for this job's action.
    pub fn decode_args<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.args.clone()).map_err(|e| {
            DdlError::InvalidJobArgs(format!("job {} ({}): {}", self.id, self.action, e))
        })
    }

    /// Records a failure message on the job.
    pub fn encode_error(&mut self, error: &str) {
        self.error = Some(error.to_string());
        self.error_count += 1;
    }

    pub fn is_running(&self) -> bool {
        self.state == JobState::Running
    }

    pub fn is_rolling_back(&self) -> bool {
        self.state == JobState::RollingBack
    }

    pub fn is_done(&self) -> bool {
        self.state == JobState::Done
    }

    pub fn is_rollback_done(&self) -> bool {
        self.state == JobState::RollbackDone
    }

    pub fn is_synced(&self) -> bool {
        self.state == JobState::Synced
    }

    /// Whether the job may have changed the schema other nodes observe.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self.state,
            JobState::Running | JobState::RollingBack | JobState::Done | JobState::RollbackDone
        )
    }

    /// Whether the catalog work of the job is over.
    pub fn is_finished(&self) -> bool {
        matches!(
            self.state,
            JobState::Done | JobState::RollbackDone | JobState::Synced
        )
    }

    /// Tables whose metadata locks must drain before the job is synced.
    pub fn involved_table_ids(&self) -> Vec<i64> {
        match self.action {
            ActionType::CreateTables => self
                .decode_args::<CreateTablesArgs>()
                .map(|args| args.tables.iter().map(|t| t.id).collect())
                .unwrap_or_default(),
            ActionType::TruncateTable => {
                let mut ids = vec![self.table_id];
                if let Ok(args) = self.decode_args::<TruncateTableArgs>() {
                    ids.push(args.new_table_id);
                }
                ids
            }
            _ if self.table_id != 0 => vec![self.table_id],
            _ => Vec::new(),
        }
    }
}

/// Metadata-lock bookkeeping of a job waiting for convergence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MdlInfo {
    pub job_id: i64,
    pub version: i64,
    pub table_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSchemaArgs {
    pub schema: SchemaInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTableArgs {
    pub table: TableInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTablesArgs {
    pub tables: Vec<TableInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TruncateTableArgs {
    pub new_table_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnArgs {
    pub column: ColumnInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexArgs {
    pub index: IndexInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NameArgs {
    pub name: String,
}
