//! # courier-server
//!
//! Real-time delivery service for Courier.
//!
//! This binary provides:
//! - **WebSocket endpoint** (`/ws`) carrying contact, chat and file-chunk
//!   events for authenticated users
//! - **Presence-aware notifications**: live push when the user is connected,
//!   otherwise a message on the durable `notification-service` queue
//! - **Chunked upload reassembly** into the local upload directory
//! - **Read API** (axum) for contacts, pending requests, conversations and
//!   file downloads
//!
//! Tokens and user details come from the auth service over AMQP. Without an
//! `AMQP_URL` the server runs an in-process broker and auth responders, which
//! is enough for local development.

mod api;
mod assembly;
mod auth;
mod config;
mod error;
mod file_store;
mod handlers;
mod notifier;
mod registry;
mod worker;
mod ws;

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use courier_broker::{AmqpBroker, BatchDetailFetcher, Broker, MemoryBroker, RpcClient};
use courier_shared::auth::JwtCodec;
use courier_shared::constants::NOTIFICATION_QUEUE;
use courier_store::SqliteStore;

use crate::api::AppState;
use crate::assembly::AssemblyEngine;
use crate::auth::{JwtTokenDecoder, RpcTokenDecoder, TokenDecoder};
use crate::config::ServerConfig;
use crate::file_store::FileStore;
use crate::handlers::Handlers;
use crate::notifier::Notifier;
use crate::registry::ConnectionRegistry;
use crate::worker::NotificationQueue;

/// Used only with the in-process broker when no `JWT_SECRET` is set.
const DEV_JWT_SECRET: &str = "courier-dev-secret";

const NOTIFICATION_QUEUE_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,courier_server=debug")),
        )
        .init();

    info!("Starting Courier server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Broker and store
    // -----------------------------------------------------------------------
    let store = SqliteStore::open_at(&config.database_path)?;

    let (broker, amqp): (Arc<dyn Broker>, Option<Arc<AmqpBroker>>) = match &config.amqp_url {
        Some(url) => {
            let amqp = Arc::new(AmqpBroker::connect(url).await?);
            let broker: Arc<dyn Broker> = amqp.clone();
            (broker, Some(amqp))
        }
        None => {
            warn!("AMQP_URL not set, using in-process broker and auth responders");
            let broker: Arc<dyn Broker> = Arc::new(MemoryBroker::new());
            let secret = config.jwt_secret.clone().unwrap_or_else(|| {
                warn!("JWT_SECRET not set, using the development secret");
                DEV_JWT_SECRET.to_string()
            });
            courier_auth::spawn_all(
                broker.clone(),
                Arc::new(store.clone()),
                JwtCodec::new(secret.as_bytes()),
            );
            (broker, None)
        }
    };

    broker.declare_queue(NOTIFICATION_QUEUE, true).await?;

    // Private reply queue so replies never land on another instance.
    let reply_queue = format!("{}-replies-{}", config.service_name, uuid::Uuid::new_v4().simple());
    let rpc = Arc::new(RpcClient::start(broker.clone(), reply_queue, config.rpc_timeout).await?);

    // -----------------------------------------------------------------------
    // 4. Initialize subsystems
    // -----------------------------------------------------------------------
    let tokens: Arc<dyn TokenDecoder> = match (&config.jwt_secret, &amqp) {
        (Some(secret), _) => Arc::new(JwtTokenDecoder::new(JwtCodec::new(secret.as_bytes()))),
        (None, Some(_)) => Arc::new(RpcTokenDecoder::new(rpc.clone())),
        (None, None) => Arc::new(JwtTokenDecoder::new(JwtCodec::new(DEV_JWT_SECRET.as_bytes()))),
    };

    let files = Arc::new(FileStore::new(config.uploads_path.clone(), config.max_file_size).await?);
    let assembly = Arc::new(AssemblyEngine::new(config.max_file_size));

    let registry = ConnectionRegistry::new();
    let notifier = Notifier::new(registry.clone(), broker.clone(), config.ws_send_timeout);
    let (progress, _worker) = NotificationQueue::spawn(notifier.clone(), NOTIFICATION_QUEUE_CAPACITY);

    let handlers = Arc::new(Handlers::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        notifier,
        progress,
        assembly.clone(),
        files,
    ));

    let app_state = AppState {
        registry,
        handlers,
        tokens,
        details: Arc::new(BatchDetailFetcher::new(rpc.clone())),
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 5. Spawn background tasks
    // -----------------------------------------------------------------------

    // Abandoned uploads
    let idle = config.assembly_idle;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            let purged = assembly.purge_stale(idle);
            if purged > 0 {
                info!(purged, in_flight = assembly.in_flight(), "Discarded idle uploads");
            }
        }
    });

    // RPC calls whose caller went away without cleaning up
    let rpc_sweep = rpc.clone();
    let max_age = config.rpc_timeout * 2;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        loop {
            interval.tick().await;
            let purged = rpc_sweep.purge_expired(max_age);
            if purged > 0 {
                warn!(purged, "Purged expired RPC calls");
            }
        }
    });

    // -----------------------------------------------------------------------
    // 6. Run the HTTP / WebSocket server (blocks until shutdown)
    // -----------------------------------------------------------------------
    let http_addr = config.http_addr;
    let result = tokio::select! {
        result = api::serve(app_state, http_addr) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            Ok(())
        }
    };

    if let Some(amqp) = amqp {
        if let Err(e) = amqp.close().await {
            warn!(error = %e, "Failed to close AMQP connection");
        }
    }

    if let Err(e) = &result {
        tracing::error!(error = %e, "HTTP server failed");
    }
    result
}
