//! chatrelay CLI: the main entry point.
//!
//! Commands:
//! - `serve`: Start the HTTP bridge
//! - `memory`: Export or clear a session's stored memory
//! - `config`: Print the default configuration
//! - `doctor`: Diagnose configuration, upstream and database

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "chatrelay",
    about = "chatrelay: memory-aware chat bridge for OpenAI-compatible endpoints",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP bridge
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Inspect or clear stored session memory
    Memory {
        #[command(subcommand)]
        action: MemoryAction,
    },

    /// Print the default configuration
    Config,

    /// Diagnose system health
    Doctor,
}

#[derive(Subcommand)]
enum MemoryAction {
    /// Print a session's recent history as JSON
    Export {
        /// Session id
        #[arg(short, long)]
        session: String,

        /// Exchanges to include (defaults to memory.turns)
        #[arg(short, long)]
        turns: Option<usize>,
    },

    /// Delete a session's history and sticky facts
    Clear {
        /// Session id
        #[arg(short, long)]
        session: String,

        /// Required; nothing is deleted without it
        #[arg(long)]
        confirm: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Serve { port } => commands::serve::run(port).await?,
        Commands::Memory { action } => match action {
            MemoryAction::Export { session, turns } => commands::memory::export(&session, turns).await?,
            MemoryAction::Clear { session, confirm } => commands::memory::clear(&session, confirm).await?,
        },
        Commands::Config => commands::config_cmd::show().await?,
        Commands::Doctor => commands::doctor::run().await?,
    }

    Ok(())
}
