//! HTTP routes for the relay's liveness endpoints.

use axum::{response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;

/// Plain-text liveness message served on `/`.
pub const LIVENESS_TEXT: &str = "Relay bot is running!";

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

async fn index() -> &'static str {
    LIVENESS_TEXT
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        service: "relay",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Build the health router.
pub fn build_router() -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
}
