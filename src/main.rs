//! Knowledge Graph Core - command line
//!
//! Connectivity checks, on-demand backups and config inspection.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use knowledge_graph_core::backup::{BackupOrchestrator, Neo4jExporter};
use knowledge_graph_core::neo4j::{ConnectionManager, Neo4jConnector};
use knowledge_graph_core::{events::EventBus, Config};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "graph-core")]
#[command(about = "Knowledge graph persistence layer tools")]
struct Cli {
    /// Path to the YAML config file (defaults to ./config.yaml)
    #[arg(short, long, env = "GRAPH_CORE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to Neo4j and verify it is reachable
    Check,

    /// Export the whole graph now and rotate old backups
    Backup {
        /// Override the backup directory
        #[arg(short, long)]
        directory: Option<PathBuf>,
    },

    /// Print the effective configuration (password redacted)
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    init_tracing();

    let cli = Cli::parse();
    let config = Config::from_yaml_and_env(cli.config.as_deref())?;

    match cli.command {
        Commands::Check => run_check(config).await,
        Commands::Backup { directory } => run_backup(config, directory).await,
        Commands::Config => {
            let shown = serde_yaml::to_string(&config.redacted())
                .context("Failed to render configuration")?;
            print!("{}", shown);
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,knowledge_graph_core=debug".into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn run_check(config: Config) -> Result<()> {
    let connections = ConnectionManager::new(config.neo4j, Arc::new(Neo4jConnector::new()));
    connections
        .acquire()
        .await
        .context("Neo4j is not reachable")?;
    tracing::info!(uri = %connections.settings().uri, "Neo4j connection verified");
    connections.shutdown().await?;
    Ok(())
}

async fn run_backup(config: Config, directory: Option<PathBuf>) -> Result<()> {
    let mut settings = config.backup;
    if let Some(directory) = directory {
        settings.directory = directory;
    }

    let connections = Arc::new(ConnectionManager::new(
        config.neo4j,
        Arc::new(Neo4jConnector::new()),
    ));
    let orchestrator = BackupOrchestrator::detached(
        Arc::new(Neo4jExporter::new(connections.clone())),
        Arc::new(EventBus::default()),
        settings,
    );

    let result = orchestrator.trigger_now().await;
    orchestrator.stop().await;
    connections.shutdown().await?;

    let artifact = result.context("Backup failed")?;
    tracing::info!(
        "Backup written to {} ({} nodes, {} relationships)",
        artifact.path.display(),
        artifact.node_count,
        artifact.relationship_count
    );
    Ok(())
}
