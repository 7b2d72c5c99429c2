//! Entry point for `subway-client` (spec.md §1, §5).

use clap::Parser;
use subway_client::agent;
use subway_client::config::ClientConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ClientConfig::parse();

    let level = if config.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("subway_client={level}"))),
        )
        .init();

    agent::run(config).await
}
