//! farmctl - CLI for the renderfarm backend.

use anyhow::Result;
use clap::Parser;
use colored::Colorize;

mod client;
mod commands;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Err(error) = cli.run().await {
        eprintln!("{} {error:#}", "Error:".red().bold());
        std::process::exit(1);
    }

    Ok(())
}
