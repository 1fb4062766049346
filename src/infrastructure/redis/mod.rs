//! Redis high availability module
//!
//! - `CircuitBreaker`: fails fast while Redis is unavailable
//! - `ExponentialBackoff`: delays between pub/sub resubscription attempts
//! - `RedisHealth`: connection health shared by command and pub/sub paths
//! - `pool`: the multiplexed command connection

mod backoff;
mod circuit_breaker;
mod health;
pub mod pool;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
pub use health::{RedisHealth, RedisHealthStats, RedisHealthStatus};
pub use pool::RedisPool;

/// Get current time in milliseconds since epoch
pub(crate) fn current_time_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
