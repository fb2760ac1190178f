use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rrp::{elf, RrpConfig, RrpServer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rrp=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // The TLS side of the outbound client needs a process-default provider.
    let _ = rustls::crypto::ring::default_provider().install_default();

    elf::init();

    let config = RrpConfig::from_env()?;

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            let _ = shutdown_tx.send(());
        }
    });

    RrpServer::new(config).run(shutdown_rx).await?;

    tracing::info!("shutdown complete");
    Ok(())
}
