//! LeadScout CLI: a thin request handler over the lead discovery pipeline.
//!
//! Runs searches for one account, prints ranked leads, and reads back
//! stored sessions and progress records.

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
