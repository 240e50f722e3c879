mod analysis;
mod assistant;
mod config;
mod db;
mod errors;
mod persistence;
mod relay;
mod routes;
mod state;
mod storage;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use aws_config::Region;
use aws_sdk_s3::config::Credentials;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::db::create_pool;
use crate::persistence::PgPersistenceSink;
use crate::relay::providers::{CompletionAdapter, ProviderEndpoint, ReasoningAdapter};
use crate::relay::StreamRelay;
use crate::routes::build_router;
use crate::state::AppState;
use crate::storage::S3BlobStore;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const POOL_IDLE_PER_HOST: usize = 32;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting inference relay v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL
    let db = create_pool(&config.database_url).await?;

    // Initialize S3 / MinIO
    let s3 = build_s3_client(&config).await;
    info!("S3 client initialized");

    // One HTTP pool shared by both providers
    let http = reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .pool_max_idle_per_host(POOL_IDLE_PER_HOST)
        .build()
        .context("Failed to build upstream HTTP client")?;

    let reasoning = ReasoningAdapter::new(http.clone(), ProviderEndpoint::from_config(&config.ark));
    let completion =
        CompletionAdapter::new(http, ProviderEndpoint::from_config(&config.siliconflow));
    info!(
        "Providers initialized (reasoning: {}, completion: {})",
        config.ark.model, config.siliconflow.model
    );

    let shutdown = CancellationToken::new();
    let relay = StreamRelay::new(
        Arc::new(reasoning),
        Arc::new(completion),
        Arc::new(PgPersistenceSink::new(db.clone())),
        shutdown.clone(),
    );

    // Build app state
    let state = AppState {
        db,
        relay: Arc::new(relay),
        blobs: Arc::new(S3BlobStore::new(s3, config.s3_bucket.clone())),
        config: config.clone(),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: restrict CORS origins once the frontend host is fixed

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Resolves on Ctrl-C and cancels every live relay session.
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested; cancelling live sessions");
    shutdown.cancel();
}

/// Constructs an S3 client configured for MinIO (local) or AWS (production).
async fn build_s3_client(config: &Config) -> aws_sdk_s3::Client {
    let credentials = Credentials::new(
        &config.aws_access_key_id,
        &config.aws_secret_access_key,
        None,
        None,
        "relay-static",
    );

    let s3_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .credentials_provider(credentials)
        .endpoint_url(&config.s3_endpoint)
        .load()
        .await;

    aws_sdk_s3::Client::new(&s3_config)
}
