mod cli;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use toolhub_core::{ConfigManager, Toolhub};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "toolhub",
    version,
    about = "Inspect, discover and invoke the tools of a toolhub catalog"
)]
struct Cli {
    /// Workspace root holding toolhub.toml; defaults to current directory
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,

    /// Explicit configuration file, overrides workspace discovery
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print machine-readable JSON instead of styled text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Availability of every tool, or the failure detail of one
    Health { name: Option<String> },

    /// Find tools matching a natural-language need
    Find {
        query: Vec<String>,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Invoke one tool with JSON arguments
    Invoke {
        name: String,

        /// Arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,

        #[arg(long)]
        no_cache: bool,

        #[arg(long)]
        no_validate: bool,

        /// Print streamed chunks as they arrive
        #[arg(long)]
        stream: bool,

        /// Abort after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// (Re)index the catalog for tool discovery
    Index,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("TOOLHUB_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing();

    let manager = match &args.config {
        Some(path) => ConfigManager::load_from_file(path)?,
        None => {
            let workspace = match &args.workspace {
                Some(dir) => dir.clone(),
                None => std::env::current_dir().context("cannot determine current dir")?,
            };
            ConfigManager::load_from_workspace(workspace)?
        }
    };

    tracing::debug!(
        config = ?manager.config_path(),
        workspace = %manager.workspace().display(),
        "configuration loaded"
    );
    let hub = Toolhub::from_config(manager.into_config()).await?;
    let outcome = match args.command {
        Commands::Health { name } => cli::health(&hub, name.as_deref(), args.json),
        Commands::Find { query, limit } => cli::find(&hub, &query.join(" "), limit, args.json).await,
        Commands::Invoke {
            name,
            args: raw_args,
            no_cache,
            no_validate,
            stream,
            timeout,
        } => {
            let options = cli::InvokeOptions {
                use_cache: !no_cache,
                validate: !no_validate,
                stream,
                timeout,
            };
            cli::invoke(&hub, &name, &raw_args, options, args.json).await
        }
        Commands::Index => cli::index(&hub, args.json).await,
    };

    hub.shutdown().await?;
    outcome
}
