//! recrawl CLI: recurring web harvesting over tracked records.
//!
//! Seeds records into a local store, refreshes the stale ones through the
//! cache-first fetch pipeline, and reconciles results back into storage.

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
