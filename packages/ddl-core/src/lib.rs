//! Core model for schema-change coordination.
//!
//! Provides schema snapshots and diffs, the versioned snapshot cache,
//! the DDL job model, error taxonomy, configuration, and the traits
//! describing the external collaborators (job table, catalog store,
//! coordination service, timestamp source, sessions, metrics).

pub mod cache;
pub mod config;
pub mod error;
pub mod job;
pub mod memory;
pub mod metrics;
pub mod retry;
pub mod schema;
pub mod store;

pub use cache::VersionedSchemaCache;
pub use error::{DdlError, ErrorKind, Result};
pub use job::{DdlJob, JobState};
pub use schema::{ActionType, SchemaDiff, SchemaSnapshot};
