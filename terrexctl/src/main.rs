mod cli;
mod commands;
mod wiring;

use anyhow::Context;
use clap::Parser;
use terrex_config::{ConfigLoad, ConfigLoader};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::{
    cli::{Cli, Command},
    commands::Output,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                // Override via RUST_LOG.
                "info,reconcile::pass=info,sqlx=warn".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut loader = ConfigLoader::new();
    if let Some(path) = &cli.env_file {
        loader = loader.with_env_file(path);
    }
    if let Some(path) = &cli.config {
        loader = loader.with_config_path(path);
    }
    let ConfigLoad { config, metadata } =
        loader.load().context("failed to load configuration")?;
    if metadata.env_file_loaded {
        info!("loaded .env file");
    }

    let out = Output::new(cli.json);
    if let Command::Config(command) = &cli.command {
        return commands::run_config(command, &config, &out);
    }

    let orchestrator = wiring::build_orchestrator(&config).await?;
    commands::run(cli.command, &orchestrator, &out).await
}
