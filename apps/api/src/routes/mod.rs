pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::analysis::handlers as analysis;
use crate::assistant::handlers as assistant;
use crate::state::AppState;

const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Assistant
        .route("/api/assistant/chat", post(assistant::handle_chat))
        .route(
            "/api/assistant/chat/stream",
            post(assistant::handle_chat_stream),
        )
        .route(
            "/api/assistant/upload-image",
            post(assistant::handle_upload_image).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/uploads/:filename", get(assistant::handle_get_upload))
        // JD analysis
        .route(
            "/api/resume/jd-breakdowns/analyze",
            post(analysis::handle_analyze),
        )
        .route(
            "/api/resume/jd-breakdowns/analyze-stream",
            post(analysis::handle_analyze_stream),
        )
        .with_state(state)
}
