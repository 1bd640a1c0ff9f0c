//! Coordinator binary
//!
//! Runs the coordinator in single-process development mode: topology lives
//! in an in-memory coordination store bootstrapped empty, and repair pushes
//! land on an in-memory queue. Production deployments wire
//! [`Coordinator::start`] to real store and queue clients instead.

use clap::{Parser, Subcommand};
use satchel::coordinator::Coordinator;
use satchel::queue::{MemoryQueueFactory, QueueDescriptor};
use satchel::store::{paths, MemoryStore, MetaStore};
use satchel::{AccountingMode, CoordinatorConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "satchel-coord")]
#[command(about = "placement and replication coordinator for a sharded blob store")]
#[command(version = satchel::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the coordinator
    Serve {
        /// Bind address for the client HTTP API
        #[arg(long, default_value = "0.0.0.0:9000")]
        bind: SocketAddr,

        /// Size accounting strategy
        #[arg(long, value_enum, default_value = "direct")]
        accounting: AccountingMode,

        /// Directory for upload spool files (system temp dir by default)
        #[arg(long)]
        spool_dir: Option<PathBuf>,
    },
}

/// Seed the in-memory store with empty records so the first synchronization
/// completes; shards and servers are added through the admin operations.
async fn bootstrap(store: &MemoryStore) -> anyhow::Result<()> {
    store.create(paths::SERVERS_MAP, b"{}".to_vec()).await?;
    store.create(paths::SHARDS_MAP, b"{}".to_vec()).await?;
    let queue = QueueDescriptor {
        servers: vec![],
        key: "repair".into(),
    };
    store
        .create(paths::QUEUE_INFO, serde_json::to_vec(&queue)?)
        .await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            bind,
            accounting,
            spool_dir,
        } => {
            let store = Arc::new(MemoryStore::new());
            bootstrap(&store).await?;

            let config = CoordinatorConfig {
                bind_addr: bind,
                accounting,
                spool_dir,
                ..Default::default()
            };

            let factory = Arc::new(MemoryQueueFactory::new());
            let (coordinator, mut events) = Coordinator::start(config, store, factory);
            tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    tracing::debug!("coordinator event: {}", event);
                }
            });

            coordinator.ready().await;
            tracing::info!("coordinator is ready");

            tokio::select! {
                result = coordinator.clone().serve() => result?,
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutting down");
                    coordinator.close().await;
                }
            }
        }
    }

    Ok(())
}
