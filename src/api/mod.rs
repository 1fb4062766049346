//! Ops API - HTTP endpoint handlers.

mod health;
mod metrics;
mod presence;
mod routes;

pub use health::{health, stats, HealthResponse, StatsResponse};
pub use metrics::prometheus_metrics;
pub use presence::{get_client, get_room, ClientPresenceResponse, RoomMembersResponse};
pub use routes::api_routes;
