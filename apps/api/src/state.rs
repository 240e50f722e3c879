use std::sync::Arc;

use sqlx::PgPool;

use crate::config::Config;
use crate::relay::StreamRelay;
use crate::storage::BlobStore;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// Job description lookups. Artifacts are written through the relay's sink.
    pub db: PgPool,
    pub relay: Arc<StreamRelay>,
    pub blobs: Arc<dyn BlobStore>,
    pub config: Config,
}
