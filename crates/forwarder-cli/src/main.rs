//! Ingest forwarder entry point

use anyhow::Result;
use clap::Parser;
use forwarder_cli::commands::{Cli, CommandExecutor};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let executor = CommandExecutor::new();
    let result = executor.execute(cli.command).await?;

    println!("{}", result.message);
    if let Some(data) = result.data {
        println!("{}", serde_json::to_string_pretty(&data)?);
    }

    Ok(())
}
