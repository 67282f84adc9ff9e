use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use courier_auth::{spawn_all, AuthConfig};
use courier_broker::{AmqpBroker, Broker};
use courier_shared::auth::JwtCodec;
use courier_store::SqliteStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,courier_auth=debug")),
        )
        .init();

    info!("Starting Courier auth responder v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = AuthConfig::from_env();
    info!(?config, "Loaded configuration");

    let amqp_url = config.amqp_url.clone().context("AMQP_URL must be set")?;
    let secret = config.jwt_secret.clone().context("JWT_SECRET must be set")?;

    // -----------------------------------------------------------------------
    // 3. Connect broker and open the store
    // -----------------------------------------------------------------------
    let amqp = Arc::new(AmqpBroker::connect(&amqp_url).await?);
    let broker: Arc<dyn Broker> = amqp.clone();
    let store = SqliteStore::open_at(&config.database_path)?;

    // -----------------------------------------------------------------------
    // 4. Serve every auth queue until one stops or Ctrl+C
    // -----------------------------------------------------------------------
    let handles = spawn_all(broker, Arc::new(store), JwtCodec::new(secret.as_bytes()));

    tokio::select! {
        (result, index, _) = futures::future::select_all(handles) => {
            match result {
                Ok(Ok(())) => tracing::warn!(responder = index, "responder stopped"),
                Ok(Err(e)) => tracing::error!(responder = index, error = %e, "responder failed"),
                Err(e) => tracing::error!(responder = index, error = %e, "responder panicked"),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    if let Err(e) = amqp.close().await {
        tracing::warn!(error = %e, "failed to close AMQP connection");
    }

    Ok(())
}
