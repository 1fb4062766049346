//! Health check and statistics endpoints.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::redis::{CircuitBreakerStats, RedisHealthStats, RedisHealthStatus};
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub node_id: String,
    pub backend: String,
    pub event_bus_running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis: Option<RedisHealthResponse>,
}

#[derive(Debug, Serialize)]
pub struct RedisHealthResponse {
    pub connected: bool,
    pub health: RedisHealthStats,
    pub circuit_breaker: CircuitBreakerStats,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub namespace: String,
    pub node_id: String,
    pub local_clients: usize,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let redis = state.redis_pool.as_ref().map(|pool| {
        let health = pool.health().stats();
        RedisHealthResponse {
            connected: health.status == RedisHealthStatus::Healthy,
            health,
            circuit_breaker: pool.circuit_breaker().stats(),
        }
    });

    let redis_ok = redis.as_ref().map(|r| r.connected).unwrap_or(true);
    let status = if redis_ok && state.store.is_running() {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        node_id: state.store.node_id().to_string(),
        backend: state.store.backend_type().as_str().to_string(),
        event_bus_running: state.store.is_running(),
        redis,
    })
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        namespace: state.store.namespace().to_string(),
        node_id: state.store.node_id().to_string(),
        local_clients: state.store.local_client_count(),
    })
}
