use clap::Parser;
use livesync_cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    livesync_cli::init_tracing(cli.global.log_level.as_deref());
    cli.run().await
}
