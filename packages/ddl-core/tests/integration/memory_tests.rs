//! In-memory collaborator tests.

use std::sync::Arc;
use std::time::Duration;

use ddl_core::job::MdlInfo;
use ddl_core::memory::InMemoryCluster;
use ddl_core::metrics::{MetricsSink, DEL_SCHEMA_DIFF};
use ddl_core::retry::retry_transient;
use ddl_core::schema::{ActionType, ColumnInfo, SchemaDiff, SchemaInfo, TableInfo};
use ddl_core::store::{
    self_version_key, CatalogStore, CoordinationService, JobTable, SessionGuard, WatchEvent,
    WatchStream, ALL_SCHEMA_VERSIONS_PREFIX,
};
use ddl_core::{DdlError, DdlJob};

#[test]
fn test_nodes_share_durable_state_but_not_sessions() {
    let cluster = InMemoryCluster::new();
    let a = cluster.node();
    let b = cluster.node();

    {
        let mut session = SessionGuard::acquire(&a.collaborators.sessions).unwrap();
        let mut job = DdlJob::create_schema(SchemaInfo::new(1, "app")).unwrap();
        a.collaborators
            .job_table
            .insert_job(&mut *session, &mut job)
            .unwrap();
    }

    let mut session = SessionGuard::acquire(&b.collaborators.sessions).unwrap();
    let pending = b
        .collaborators
        .job_table
        .load_pending_jobs(&mut *session)
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(a.sessions.outstanding(), 0);
    assert_eq!(b.sessions.outstanding(), 1);
    assert!(a.sessions.statements() > 0);
}

#[test]
fn test_catalog_versions_and_diffs() {
    let cluster = InMemoryCluster::new();
    let catalog = cluster.catalog.clone();

    catalog.create_schema(&SchemaInfo::new(1, "app")).unwrap();
    assert_eq!(
        catalog.create_schema(&SchemaInfo::new(2, "APP")),
        Err(DdlError::SchemaExists("APP".into()))
    );

    for _ in 0..5 {
        let version = catalog.gen_schema_version().unwrap();
        let mut diff = SchemaDiff::new(ActionType::CreateTable, 1, version);
        diff.version = version;
        catalog.set_schema_diff(&diff).unwrap();
    }
    assert_eq!(catalog.schema_version().unwrap(), 5);
    assert_eq!(catalog.schema_version_with_non_empty_diff().unwrap(), 5);

    assert_eq!(catalog.del_schema_diff(3).unwrap(), 3);
    assert_eq!(cluster.catalog.diff_versions(), vec![4, 5]);
    assert!(catalog.schema_diff(2).unwrap().is_none());
}

#[test]
fn test_table_lifecycle_errors() {
    let cluster = InMemoryCluster::new();
    let catalog = cluster.catalog.clone();
    let table = TableInfo::new(10, "t", vec![ColumnInfo::new("id", "INT", false)]);

    assert_eq!(
        catalog.create_table(1, &table),
        Err(DdlError::SchemaNotFound(1))
    );
    catalog.create_schema(&SchemaInfo::new(1, "app")).unwrap();
    catalog.create_table(1, &table).unwrap();
    assert!(matches!(
        catalog.create_table(1, &table),
        Err(DdlError::TableExists { .. })
    ));
    catalog.drop_table(1, 10).unwrap();
    assert!(matches!(
        catalog.drop_table(1, 10),
        Err(DdlError::TableNotFound { .. })
    ));
}

#[test]
fn test_injected_catalog_failures_are_retried() {
    let cluster = InMemoryCluster::new();
    cluster.catalog.inject_failures(2);
    let catalog = cluster.catalog.clone();

    let version = retry_transient(|| catalog.gen_schema_version(), 3, 0, "gen version").unwrap();
    assert_eq!(version, 1);
}

#[test]
fn test_mdl_rows_round_trip() {
    let cluster = InMemoryCluster::new();
    let node = cluster.node();
    let mut session = SessionGuard::acquire(&node.collaborators.sessions).unwrap();
    let jobs = node.collaborators.job_table.clone();

    jobs.set_mdl_info(
        &mut *session,
        &MdlInfo {
            job_id: 3,
            version: 9,
            table_ids: vec![10],
        },
    )
    .unwrap();
    assert_eq!(jobs.mdl_version(&mut *session, 3).unwrap(), Some(9));
    assert_eq!(jobs.mdl_infos(&mut *session).unwrap().len(), 1);
    jobs.clean_mdl_info(&mut *session, 3).unwrap();
    assert_eq!(jobs.mdl_version(&mut *session, 3).unwrap(), None);
}

#[test]
fn test_coordination_watch_and_versions() {
    let cluster = InMemoryCluster::new();
    let coordination: Arc<dyn CoordinationService> = cluster.coordinator.clone();
    let mut watch = coordination.watch(&self_version_key("n1")).unwrap();

    coordination.put(&self_version_key("n1"), 4).unwrap();
    coordination.put(&self_version_key("n2"), 3).unwrap();

    assert_eq!(
        watch.next(Duration::from_millis(50)).unwrap(),
        WatchEvent::Put(4)
    );
    let members = coordination.scan_prefix(ALL_SCHEMA_VERSIONS_PREFIX).unwrap();
    assert_eq!(members.len(), 2);
}

#[test]
fn test_node_metrics_are_isolated() {
    let cluster = InMemoryCluster::new();
    let a = cluster.node();
    let b = cluster.node();
    a.collaborators.metrics.incr_counter(DEL_SCHEMA_DIFF);
    assert_eq!(a.metrics.counter(DEL_SCHEMA_DIFF), 1);
    assert_eq!(b.metrics.counter(DEL_SCHEMA_DIFF), 0);
}
