use anyhow::Result;
use clap::Parser;
use rig_console::cli::{self, Cli};
use rig_console::{telemetry, Config};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    cli.apply(&mut config);
    telemetry::init(config.metrics_addr)?;

    cli::run(cli, config).await
}
