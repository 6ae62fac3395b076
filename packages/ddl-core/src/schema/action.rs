//! DDL action types.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::DdlError;

/// Kind of schema change carried by a job or a diff.
///
/// The numeric codes are persisted in job records and schema diffs and must
/// never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum ActionType {
    None,
    CreateSchema,
    DropSchema,
    CreateTable,
    DropTable,
    AddColumn,
    DropColumn,
    AddIndex,
    DropIndex,
    TruncateTable,
    ModifyColumn,
    AddPrimaryKey,
    CreateTables,
}

impl ActionType {
    /// Stable persisted code.
    pub fn code(self) -> u32 {
        match self {
            ActionType::None => 0,
            ActionType::CreateSchema => 1,
            ActionType::DropSchema => 2,
            ActionType::CreateTable => 3,
            ActionType::DropTable => 4,
            ActionType::AddColumn => 5,
            ActionType::DropColumn => 6,
            ActionType::AddIndex => 7,
            ActionType::DropIndex => 8,
            ActionType::TruncateTable => 11,
            ActionType::ModifyColumn => 12,
            ActionType::AddPrimaryKey => 32,
            ActionType::CreateTables => 60,
        }
    }

    /// Decodes a persisted code.
    pub fn from_code(code: u32) -> Result<Self, DdlError> {
        let action = match code {
            0 => ActionType::None,
            1 => ActionType::CreateSchema,
            2 => ActionType::DropSchema,
            3 => ActionType::CreateTable,
            4 => ActionType::DropTable,
            5 => ActionType::AddColumn,
            6 => ActionType::DropColumn,
            7 => ActionType::AddIndex,
            8 => ActionType::DropIndex,
            11 => ActionType::TruncateTable,
            12 => ActionType::ModifyColumn,
            32 => ActionType::AddPrimaryKey,
            60 => ActionType::CreateTables,
            other => {
                return Err(DdlError::UnsupportedAction(format!(
                    "unknown action code {}",
                    other
                )))
            }
        };
        Ok(action)
    }

    /// Actions that may need a data backfill phase.
    pub fn may_need_reorg(self) -> bool {
        matches!(
            self,
            ActionType::AddIndex | ActionType::AddPrimaryKey | ActionType::ModifyColumn
        )
    }

    /// Actions that operate on a whole schema rather than one table.
    pub fn is_schema_level(self) -> bool {
        matches!(self, ActionType::CreateSchema | ActionType::DropSchema)
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl TryFrom<u32> for ActionType {
    type Error = DdlError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        ActionType::from_code(code)
    }
}

impl From<ActionType> for u32 {
    fn from(action: ActionType) -> Self {
        action.code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(ActionType::CreateSchema.code(), 1);
        assert_eq!(ActionType::AddColumn.code(), 5);
        assert_eq!(ActionType::TruncateTable.code(), 11);
        assert_eq!(ActionType::AddPrimaryKey.code(), 32);
        assert_eq!(ActionType::CreateTables.code(), 60);
    }

    #[test]
    fn test_persisted_as_code() {
        let json = serde_json::to_string(&ActionType::ModifyColumn).unwrap();
        assert_eq!(json, "12");
        let decoded: ActionType = serde_json::from_str("7").unwrap();
        assert_eq!(decoded, ActionType::AddIndex);
        assert!(serde_json::from_str::<ActionType>("9").is_err());
    }

    #[test]
    fn test_reorg_actions() {
        assert!(ActionType::AddIndex.may_need_reorg());
        assert!(ActionType::AddPrimaryKey.may_need_reorg());
        assert!(!ActionType::AddColumn.may_need_reorg());
    }
}
