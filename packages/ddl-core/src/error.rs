//! DDL error types.

use thiserror::Error;

/// Message persisted on a job whose convergence wait ran out of time.
pub const LOCK_WAIT_TIMEOUT_MSG: &str = "Lock wait timeout exceeded";

/// Result alias used throughout the DDL crates.
pub type Result<T> = std::result::Result<T, DdlError>;

/// How a failure must be handled by the loop that observed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Logged and retried on a later tick; never a final job failure.
    Retryable,
    /// The job rolls back and the error text is persisted on it.
    JobFatal,
    /// A sequencing bug upstream; logged as an error and the call abandoned.
    Invariant,
    /// The process is stopping.
    Shutdown,
}

/// Schema-change coordination errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DdlError {
    /// This node lost (or never had) DDL ownership
    #[error("Node is not the DDL owner")]
    NotOwner,

    /// Convergence barrier did not complete before its deadline
    #[error("Lock wait timeout exceeded")]
    LockWaitTimeout,

    /// Coordination service could not be reached
    #[error("Coordination service unavailable: {0}")]
    CoordinationUnavailable(String),

    /// Timestamp source could not hand out a timestamp
    #[error("Timestamp source unavailable: {0}")]
    TimestampUnavailable(String),

    /// No session could be acquired
    #[error("Session unavailable: {0}")]
    SessionUnavailable(String),

    /// Durable store (catalog or job table) failed transiently
    #[error("Store error: {0}")]
    Store(String),

    /// Bounded queue stayed full
    #[error("Queue '{queue}' is full")]
    QueueFull { queue: &'static str },

    /// Schema already exists
    #[error("Schema '{0}' already exists")]
    SchemaExists(String),

    /// Schema not found
    #[error("Schema {0} not found")]
    SchemaNotFound(i64),

    /// Table already exists in schema
    #[error("Table '{table}' already exists in schema {schema_id}")]
    TableExists { schema_id: i64, table: String },

    /// Table not found in schema
    #[error("Table {table_id} not found in schema {schema_id}")]
    TableNotFound { schema_id: i64, table_id: i64 },

    /// Column already exists in table
    #[error("Column '{column}' already exists in table '{table}'")]
    ColumnExists { table: String, column: String },

    /// Column not found in table
    #[error("Column '{column}' not found in table '{table}'")]
    ColumnNotFound { table: String, column: String },

    /// Index already exists in table
    #[error("Index '{index}' already exists in table '{table}'")]
    IndexExists { table: String, index: String },

    /// Index not found in table
    #[error("Index '{index}' not found in table '{table}'")]
    IndexNotFound { table: String, index: String },

    /// Job arguments could not be decoded for its action
    #[error("Invalid job arguments: {0}")]
    InvalidJobArgs(String),

    /// Data backfill failed
    #[error("Reorg failed: {0}")]
    ReorgFailed(String),

    /// Reorg was asked to run on an object in the wrong state
    #[error("Invalid reorg state: {0}")]
    InvalidReorgState(String),

    /// Action type cannot be executed
    #[error("Unsupported DDL action: {0}")]
    UnsupportedAction(String),

    /// The version to wait for is zero: no diff was recorded for the job
    #[error("Schema version doesn't change, job {job_id}")]
    SchemaVersionUnchanged { job_id: i64 },

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// A background component could not be started
    #[error("Startup failed: {0}")]
    Startup(String),

    /// Shutdown was signalled while waiting
    #[error("Shutting down")]
    Shutdown,
}

impl DdlError {
    /// Classifies the error for the loop that observed it.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DdlError::NotOwner
            | DdlError::LockWaitTimeout
            | DdlError::CoordinationUnavailable(_)
            | DdlError::TimestampUnavailable(_)
            | DdlError::SessionUnavailable(_)
            | DdlError::Store(_)
            | DdlError::QueueFull { .. }
            | DdlError::SerializationError(_) => ErrorKind::Retryable,
            DdlError::SchemaExists(_)
            | DdlError::SchemaNotFound(_)
            | DdlError::TableExists { .. }
            | DdlError::TableNotFound { .. }
            | DdlError::ColumnExists { .. }
            | DdlError::ColumnNotFound { .. }
            | DdlError::IndexExists { .. }
            | DdlError::IndexNotFound { .. }
            | DdlError::InvalidJobArgs(_)
            | DdlError::ReorgFailed(_)
            | DdlError::InvalidReorgState(_)
            | DdlError::UnsupportedAction(_) => ErrorKind::JobFatal,
            DdlError::SchemaVersionUnchanged { .. } | DdlError::Startup(_) => ErrorKind::Invariant,
            DdlError::Shutdown => ErrorKind::Shutdown,
        }
    }

    /// Returns true if the operation may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Retryable
    }

    /// Returns true if the error must roll the job back.
    pub fn is_job_fatal(&self) -> bool {
        self.kind() == ErrorKind::JobFatal
    }
}

impl From<serde_json::Error> for DdlError {
    fn from(e: serde_json::Error) -> Self {
        DdlError::SerializationError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_wait_timeout_message_matches_persisted_text() {
        assert_eq!(DdlError::LockWaitTimeout.to_string(), LOCK_WAIT_TIMEOUT_MSG);
    }

    #[test]
    fn test_error_classification() {
        assert!(DdlError::NotOwner.is_retryable());
        assert!(DdlError::TimestampUnavailable("tso down".into()).is_retryable());
        assert!(DdlError::TableExists {
            schema_id: 1,
            table: "T".into()
        }
        .is_job_fatal());
        assert!(DdlError::ReorgFailed("backfill".into()).is_job_fatal());
        assert_eq!(
            DdlError::SchemaVersionUnchanged { job_id: 3 }.kind(),
            ErrorKind::Invariant
        );
        assert_eq!(DdlError::Shutdown.kind(), ErrorKind::Shutdown);
    }
}
