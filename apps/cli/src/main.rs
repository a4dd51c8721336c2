//! CampusBot CLI: cache-backed campus lookups and the warmup daemon.
//!
//! One-shot commands resolve through the same tiers the chat adapter uses;
//! `serve` keeps the cache warm in the background.

mod commands;
mod metrics;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    let config = commands::load(&cli)?;
    commands::init_tracing(&cli, &config);
    commands::run(cli, config).await
}
