use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use chatgate::cli::{self, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chatgate=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    cli::run(Cli::parse()).await
}
