use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use butterfly_query::{logging, Engine, EngineConfig, ServiceRequest, StaticGraph};
use clap::{Parser, Subcommand};
use tracing::info;

#[derive(Parser)]
#[command(name = "butterfly-query")]
#[command(about = "Contraction-hierarchy table and route queries", long_about = None)]
struct Cli {
    /// Engine configuration (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    /// Default log level when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute a weight table between phantoms
    Table {
        /// Graph file (JSON)
        graph: PathBuf,
        /// Request file (JSON: phantoms, sources, destinations)
        request: PathBuf,
        /// Override `max_table_size`
        #[arg(long)]
        max_table_size: Option<usize>,
        /// Compute rows in parallel
        #[arg(long)]
        parallel: bool,
    },
    /// Shortest path between two phantoms
    Route {
        /// Graph file (JSON)
        graph: PathBuf,
        /// Request file (JSON: phantoms, optional sources/destinations)
        request: PathBuf,
        /// Include the packed node path
        #[arg(long)]
        path: bool,
    },
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

fn load_request(path: &Path) -> Result<ServiceRequest> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read request {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid request {}", path.display()))
}

fn run(
    config: EngineConfig,
    graph_path: &Path,
    service: &str,
    request: &ServiceRequest,
) -> Result<()> {
    let graph = StaticGraph::load(graph_path)
        .with_context(|| format!("Failed to load graph {}", graph_path.display()))?;
    info!(path = %graph_path.display(), edges = graph.edge_count(), "Loaded graph");

    let engine = Engine::new(config, graph);
    let response = engine.dispatch(service, request);
    println!("{}", serde_json::to_string_pretty(&response)?);

    if !response.status.is_success() {
        anyhow::bail!("{service} request failed with status {}", response.status);
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level, cli.log_json)?;
    let mut config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Table {
            graph,
            request,
            max_table_size,
            parallel,
        } => {
            if let Some(size) = max_table_size {
                config.max_table_size = size;
            }
            config.parallel_rows |= parallel;
            config.validate()?;
            let request = load_request(&request)?;
            run(config, &graph, "table", &request)
        }
        Commands::Route {
            graph,
            request,
            path,
        } => {
            let mut request = load_request(&request)?;
            request.want_path |= path;
            run(config, &graph, "route", &request)
        }
    }
}
