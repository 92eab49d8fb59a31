use anyhow::{Context, Result};
use clap::Parser;
use runqlat::RunqlatEngine;
use runqlat::settings::{Cli, Settings};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(
        if cli.verbose { "info" } else { "warn" },
    ))
    .init();

    let mut settings = Settings::new(cli.config.as_ref()).context("Failed to load settings")?;
    cli.apply(&mut settings);

    let engine = RunqlatEngine::new(settings)?;
    engine.run().await
}
