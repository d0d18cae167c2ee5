//! Meshwork CLI
//!
//! Run an overlay node, or poke a running one from the terminal.

mod commands;
mod output;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "meshwork")]
#[command(author = "LogicCrafter")]
#[command(version = "0.1.0")]
#[command(about = "Meshwork - self-organizing P2P overlay", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a node until Ctrl-C
    Run(commands::run::RunArgs),

    /// Ask a node for its neighbors
    Neighbors(commands::neighbors::NeighborsArgs),

    /// Broadcast a text message through a node
    Broadcast(commands::broadcast::BroadcastArgs),
}

fn init_tracing(default_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // One-shot commands stay quiet unless RUST_LOG says otherwise.
    let default_level = match cli.command {
        Commands::Run(_) => "info",
        _ => "warn",
    };
    init_tracing(default_level, cli.json_logs);

    let exit_code = match cli.command {
        Commands::Run(args) => commands::run::run(args).await,
        Commands::Neighbors(args) => commands::neighbors::run(args).await,
        Commands::Broadcast(args) => commands::broadcast::run(args).await,
    };

    std::process::exit(exit_code);
}
