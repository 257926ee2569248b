//! # hive-node
//!
//! - `hive-node execute <definition.json> [--data <json>]` runs a task
//!   definition against the workers listed in the config and prints the
//!   outcome as JSON
//! - `hive-node validate <definition.json>` checks that a definition can run

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use hive_node::{load_definition, validate_definition, Node, NodeConfig};

#[derive(Parser)]
#[command(name = "hive-node")]
#[command(version, about = "Hive multi-agent task coordination node", long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, env = "HIVE_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level when RUST_LOG is unset (overrides the config file)
    #[arg(long, global = true, env = "HIVE_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a task definition to completion
    Execute {
        /// JSON task definition
        definition: PathBuf,

        /// Initial task context, as a JSON object
        #[arg(long, value_name = "JSON")]
        data: Option<String>,
    },

    /// Check a task definition without running it
    Validate {
        /// JSON task definition
        definition: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = NodeConfig::load(cli.config.as_deref())?;

    let level = cli.log_level.as_deref().unwrap_or(&config.log_level);
    init_logging(level)?;

    match cli.command {
        Commands::Execute { definition, data } => execute(&config, definition, data).await,
        Commands::Validate { definition } => {
            let definition = load_definition(&definition, config.orchestrator.default_timeout_ms)?;
            let graph = validate_definition(&definition)?;
            println!("{}: {} steps, valid", definition.name, graph.len());
            Ok(())
        }
    }
}

async fn execute(config: &NodeConfig, path: PathBuf, data: Option<String>) -> Result<()> {
    let definition = load_definition(&path, config.orchestrator.default_timeout_ms)?;
    let data = match data {
        Some(raw) => match serde_json::from_str::<serde_json::Value>(&raw).context("Invalid --data")? {
            serde_json::Value::Object(map) => map,
            _ => bail!("--data must be a JSON object"),
        },
        None => serde_json::Map::new(),
    };

    let node = Node::start(config).await?;
    if node.worker_count() == 0 {
        tracing::warn!("No workers configured; every step will time out");
    }

    let outcome = node.execute(&definition, data).await;
    node.shutdown();

    let outcome = outcome?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    Ok(())
}
