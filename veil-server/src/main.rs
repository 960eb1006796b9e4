//! veil-server: serves a two-player Paths of Glory card game where each player
//! sees only what the rules let them see.

use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = veil_server::cli::Cli::parse();
    veil_server::run_with_cli(cli).await
}
