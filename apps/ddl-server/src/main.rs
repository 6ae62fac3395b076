//! DDL coordination node.
//!
//! Runs a small simulated cluster in one process: every node shares the
//! in-memory catalog, job table and coordination store, node 1 is elected
//! DDL owner. Stops on Ctrl+C.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tokio::signal;

use ddl_core::config::{DdlConfig, SyncStrategyKind};
use ddl_core::memory::InMemoryCluster;
use ddl_core::schema::{ColumnInfo, IndexInfo, IndexState, SchemaInfo, TableInfo};
use ddl_core::DdlJob;
use ddl_runtime::{DdlContext, DdlNode, NodeHandle};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SyncArg {
    /// Wait for every node's self version
    Lease,
    /// Wait for per-job metadata-lock acknowledgments
    Mdl,
}

impl From<SyncArg> for SyncStrategyKind {
    fn from(arg: SyncArg) -> Self {
        match arg {
            SyncArg::Lease => SyncStrategyKind::Lease,
            SyncArg::Mdl => SyncStrategyKind::MetadataLock,
        }
    }
}

/// Command-line arguments for the DDL node.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of simulated nodes
    #[arg(long, default_value_t = 3)]
    nodes: usize,

    /// Schema lease in milliseconds
    #[arg(long, default_value_t = 45_000)]
    lease_ms: u64,

    /// Job worker pool size
    #[arg(long, default_value_t = 8)]
    workers: usize,

    /// Convergence strategy
    #[arg(long, value_enum, default_value_t = SyncArg::Lease)]
    sync: SyncArg,

    /// Delay before the first backstop dispatch tick in milliseconds
    #[arg(long, default_value_t = 10_000)]
    schedule_initial_delay_ms: u64,

    /// Submit a few demo jobs after startup
    #[arg(long)]
    demo: bool,

    /// Status log interval in milliseconds (0 disables)
    #[arg(long, default_value_t = 5000)]
    status_interval_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt::init();

    let config = DdlConfig {
        lease_ms: args.lease_ms,
        worker_pool_size: args.workers,
        sync_strategy: args.sync.into(),
        schedule_initial_delay_ms: args.schedule_initial_delay_ms,
        ..Default::default()
    };

    let cluster = InMemoryCluster::new();
    let mut nodes: Vec<Arc<NodeHandle>> = Vec::with_capacity(args.nodes.max(1));
    for i in 1..=args.nodes.max(1) {
        let node_id = format!("node-{}", i);
        let ctx = DdlContext::new(&node_id, config.clone(), cluster.node().collaborators);
        ctx.ownership.set_owner(i == 1);
        let handle =
            DdlNode::start(ctx).with_context(|| format!("failed to start {}", node_id))?;
        nodes.push(Arc::new(handle));
    }

    println!("Starting DDL coordination cluster...");
    println!("  Nodes: {}", nodes.len());
    println!("  Lease: {} ms", args.lease_ms);
    println!("  Workers: {}", args.workers);
    println!("  Convergence: {:?}", args.sync);

    if args.demo {
        let submitter = Arc::clone(&nodes[nodes.len() - 1]);
        thread::spawn(move || {
            if let Err(e) = run_demo(&submitter) {
                tracing::error!("Demo jobs failed: {}", e);
            }
        });
    }

    if args.status_interval_ms > 0 {
        let nodes = nodes.clone();
        let period = Duration::from_millis(args.status_interval_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                for node in &nodes {
                    match serde_json::to_string(&node.status()) {
                        Ok(status) => tracing::info!("{}", status),
                        Err(e) => tracing::warn!("Failed to encode node status: {}", e),
                    }
                }
            }
        });
    }

    signal::ctrl_c()
        .await
        .context("failed to listen for ctrl_c")?;
    println!("\nShutting down DDL cluster...");
    tokio::task::spawn_blocking(move || {
        for node in nodes.iter().rev() {
            node.shutdown();
        }
    })
    .await?;

    Ok(())
}

/// Creates a schema and a table, then evolves the table.
fn run_demo(node: &NodeHandle) -> anyhow::Result<()> {
    let jobs = vec![
        DdlJob::create_schema(SchemaInfo::new(1, "demo"))?,
        DdlJob::create_table(
            1,
            TableInfo::new(
                10,
                "accounts",
                vec![
                    ColumnInfo::new("id", "BIGINT", false),
                    ColumnInfo::new("owner", "TEXT", true),
                ],
            ),
        )?,
        DdlJob::add_column(1, 10, ColumnInfo::new("balance", "DECIMAL", true))?,
        DdlJob::add_index(
            1,
            10,
            IndexInfo {
                id: 20,
                name: "idx_owner".to_string(),
                columns: vec!["OWNER".to_string()],
                unique: false,
                primary: false,
                state: IndexState::Public,
            },
        )?,
    ];

    for job in jobs {
        let action = job.action;
        let job_id = node.submit(job)?;
        match node.wait_job(job_id, Duration::from_secs(120))? {
            Some(done) => tracing::info!(
                "Demo job {} ({}) ended as {:?} at version {}",
                job_id,
                action,
                done.state,
                done.schema_version
            ),
            None => anyhow::bail!("demo job {} ({}) did not finish", job_id, action),
        }
    }
    Ok(())
}
