//! csrledger CLI: keeps the per-year sustainability report ledger of every
//! tracked entity up to date.
//!
//! One invocation runs a population pass over the next batch of entities,
//! then a current-year refresh pass over the whole ledger.

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
