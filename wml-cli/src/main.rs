//! WML CLI - publish reservoir storage feeds and aggregate daily reports.

use clap::Parser;

#[derive(Parser)]
#[command(
    name = "wml-cli",
    version,
    about = "Reservoir storage (WML) feed publisher and aggregator"
)]
struct Cli {
    #[command(subcommand)]
    command: wml_cmd::Command,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    wml_cmd::run(cli.command).await
}
