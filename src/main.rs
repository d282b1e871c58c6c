mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use nino_memory::config::MemoryConfig;

#[derive(Parser)]
#[command(name = "nino-memory", version, about = "Inspect and manage conversational memory")]
struct Cli {
    /// Config file (defaults to ~/.nino/config.toml)
    #[arg(long, global = true)]
    config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Store a long-term memory
    Add {
        owner: String,
        text: String,
        /// Use this comma-separated vector instead of calling the embedding service
        #[arg(long)]
        vector: Option<String>,
    },
    /// Find the memories most similar to a query
    Search {
        owner: String,
        query: String,
        /// Maximum number of results
        #[arg(short, default_value_t = 5)]
        k: usize,
        /// Use this comma-separated vector instead of calling the embedding service
        #[arg(long)]
        vector: Option<String>,
    },
    /// Show the rolling context, optionally appending a line first
    Recent {
        owner: String,
        #[arg(long)]
        push: Option<String>,
    },
    /// Clear the rolling context for an owner
    Clear { owner: String },
    /// Delete all data for an owner
    Forget {
        owner: String,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Check that the configured backend is reachable
    Ping,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => MemoryConfig::load_from(path)?,
        None => MemoryConfig::load()?,
    };

    // Log to stderr so stdout carries only command output.
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Add { owner, text, vector } => {
            cli::search::add(&config, &owner, &text, vector.as_deref()).await?;
        }
        Command::Search { owner, query, k, vector } => {
            cli::search::search(&config, &owner, &query, k, vector.as_deref()).await?;
        }
        Command::Recent { owner, push } => {
            cli::recent::recent(&config, &owner, push.as_deref()).await?;
        }
        Command::Clear { owner } => cli::reset::clear(&config, &owner).await?,
        Command::Forget { owner, yes } => cli::reset::forget(&config, &owner, yes).await?,
        Command::Ping => cli::ping::ping(&config).await?,
    }

    Ok(())
}
