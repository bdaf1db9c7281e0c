//! Tapestry Node Binary
//!
//! Entry point for the Tapestry permaweb node. Currently exposes the
//! SPoRA CPU miner against an in-memory development weave; the networked
//! node wires the same mining controller to its chunk store and block
//! importer.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod mine;

#[derive(Debug, Parser)]
#[command(name = "tapestry", about = "Tapestry permaweb node", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the SPoRA CPU miner against an in-memory weave.
    Mine(mine::MineArgs),
}

fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match Cli::parse().command {
        Command::Mine(args) => args.run(),
    }
}
