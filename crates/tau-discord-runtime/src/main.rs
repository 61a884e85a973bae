use anyhow::Result;
use clap::Parser;
use tau_discord_runtime::{run_link_bot, Cli};
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    run_link_bot(cli).await
}
