//! Infrastructure layer modules
//!
//! This module contains shared infrastructure components:
//! - `config`: Application configuration and settings
//! - `error`: API-facing error type
//! - `metrics`: Prometheus metrics helpers
//! - `redis`: Redis connection pool, circuit breaker, backoff and health

pub mod config;
pub mod error;
pub mod metrics;
pub mod redis;
