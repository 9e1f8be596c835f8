use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use h2_dispatch::config::ServerConfig;
use h2_dispatch::server::Server;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "h2_dispatch=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::parse();
    tracing::info!(
        port = config.port,
        threads = config.threads,
        max_concurrent_streams = config.max_concurrent_streams,
        "h2-dispatch v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    let server = Server::bind(config).await?;
    server.run().await?;
    Ok(())
}
