//! Harvestline CLI: operator tooling for harvesting targets.
//!
//! Seeds targets from plan files, inspects pending work and status
//! summaries, and performs administrative status changes.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
