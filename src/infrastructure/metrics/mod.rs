//! Prometheus metrics for the connection store.
//!
//! - Lifecycle metrics (handshakes, disconnects, local client handles)
//! - Event bus metrics (published and received events by kind)
//! - Datastore metrics (errors, Redis connection status, circuit state)

mod helpers;

pub use helpers::{encode_metrics, topic_kind, BusMetrics, DatastoreMetrics, StoreMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, IntCounter,
    IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "ara_store";

lazy_static! {
    // ============================================================================
    // Lifecycle Metrics
    // ============================================================================

    pub static ref HANDSHAKES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_handshakes_total", METRIC_PREFIX),
        "Total connection ids issued by handshake"
    ).unwrap();

    /// Disconnects by whether they were forced
    pub static ref DISCONNECTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_disconnects_total", METRIC_PREFIX),
        "Total disconnects processed",
        &["forced"]
    ).unwrap();

    pub static ref LOCAL_CLIENTS: IntGauge = register_int_gauge!(
        format!("{}_local_clients", METRIC_PREFIX),
        "Client handles held by this process"
    ).unwrap();

    /// Messages sitting in paused client buffers
    pub static ref BUFFERED_MESSAGES: IntGauge = register_int_gauge!(
        format!("{}_buffered_messages", METRIC_PREFIX),
        "Messages buffered in paused client handles"
    ).unwrap();

    // ============================================================================
    // Event Bus Metrics
    // ============================================================================

    pub static ref EVENTS_PUBLISHED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_events_published_total", METRIC_PREFIX),
        "Events published through the bus",
        &["kind"]
    ).unwrap();

    pub static ref EVENTS_RECEIVED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_events_received_total", METRIC_PREFIX),
        "Events received from other processes",
        &["kind"]
    ).unwrap();

    pub static ref EVENTS_DROPPED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_events_dropped_total", METRIC_PREFIX),
        "Remote events dropped because their envelope could not be decoded"
    ).unwrap();

    // ============================================================================
    // Datastore Metrics
    // ============================================================================

    pub static ref DATASTORE_ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_datastore_errors_total", METRIC_PREFIX),
        "Datastore operation failures",
        &["operation"]
    ).unwrap();

    /// 1 when the Redis command connection is healthy
    pub static ref REDIS_CONNECTION_STATUS: IntGauge = register_int_gauge!(
        format!("{}_redis_connection_status", METRIC_PREFIX),
        "Redis connection status (1 = connected)"
    ).unwrap();

    /// 0 = closed, 1 = open, 2 = half-open
    pub static ref REDIS_CIRCUIT_BREAKER_STATE: IntGauge = register_int_gauge!(
        format!("{}_redis_circuit_breaker_state", METRIC_PREFIX),
        "Redis circuit breaker state"
    ).unwrap();

    pub static ref PUBSUB_RESUBSCRIBES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_pubsub_resubscribes_total", METRIC_PREFIX),
        "Times the wildcard subscription was re-established"
    ).unwrap();
}
