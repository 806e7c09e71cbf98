use anyhow::Result;
use clap::Parser;
use tether_app::cli::Cli;
use tether_app::{app, telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init(&cli.logging.to_config())?;
    app::run(cli).await?;
    Ok(())
}
