use axum::{routing::get, Router};

use crate::server::AppState;

use super::health::{health, stats};
use super::metrics::prometheus_metrics;
use super::presence::{get_client, get_room};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Health & Stats
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/metrics", get(prometheus_metrics))
        // Shared state inspection
        .nest(
            "/api/v1",
            Router::new()
                .route("/clients/{id}", get(get_client))
                .route("/rooms/{room}", get(get_room)),
        )
}
