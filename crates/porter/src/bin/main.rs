//! Binary entry point for the porter reverse proxy.

use anyhow::Context;
use clap::Parser;
use porter::{app, cli::Cli, config::Config};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::try_from(Cli::parse()).context("invalid startup configuration")?;
    app::run(config).await.context("porter exited with an error")?;
    Ok(())
}
