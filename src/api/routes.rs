use axum::{routing::get, Router};

use crate::server::AppState;

use super::health::{health, metrics, stats};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Health & Stats
        .route("/health", get(health))
        .route("/stats", get(stats))
        // Prometheus exposition
        .route("/metrics", get(metrics))
}
