//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use super::{
    BUFFERED_MESSAGES, DATASTORE_ERRORS_TOTAL, DISCONNECTS_TOTAL, EVENTS_DROPPED_TOTAL,
    EVENTS_PUBLISHED_TOTAL, EVENTS_RECEIVED_TOTAL, HANDSHAKES_TOTAL, LOCAL_CLIENTS,
    PUBSUB_RESUBSCRIBES_TOTAL, REDIS_CIRCUIT_BREAKER_STATE, REDIS_CONNECTION_STATUS,
};
use crate::redis::{CircuitState, RedisHealthStatus};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Label for a bus topic, bounded to the store's own event kinds.
pub fn topic_kind(topic: &str) -> &'static str {
    match topic.split_once(':').map(|(kind, _)| kind) {
        Some("message") => "message",
        Some("disconnect") => "disconnect",
        Some("disconnect-force") => "disconnect-force",
        Some("heartbeat-clear") => "heartbeat-clear",
        _ => "custom",
    }
}

pub struct StoreMetrics;

impl StoreMetrics {
    pub fn record_handshake() {
        HANDSHAKES_TOTAL.inc();
    }

    pub fn record_disconnect(forced: bool) {
        DISCONNECTS_TOTAL
            .with_label_values(&[if forced { "true" } else { "false" }])
            .inc();
    }

    pub fn set_local_clients(count: usize) {
        LOCAL_CLIENTS.set(count as i64);
    }

    pub fn record_buffered(count: usize) {
        BUFFERED_MESSAGES.add(count as i64);
    }

    pub fn record_unbuffered(count: usize) {
        BUFFERED_MESSAGES.sub(count as i64);
    }
}

pub struct BusMetrics;

impl BusMetrics {
    pub fn record_published(topic: &str) {
        EVENTS_PUBLISHED_TOTAL
            .with_label_values(&[topic_kind(topic)])
            .inc();
    }

    pub fn record_received(topic: &str) {
        EVENTS_RECEIVED_TOTAL
            .with_label_values(&[topic_kind(topic)])
            .inc();
    }

    pub fn record_dropped() {
        EVENTS_DROPPED_TOTAL.inc();
    }

    pub fn record_resubscribe() {
        PUBSUB_RESUBSCRIBES_TOTAL.inc();
    }
}

pub struct DatastoreMetrics;

impl DatastoreMetrics {
    pub fn record_error(operation: &str) {
        DATASTORE_ERRORS_TOTAL.with_label_values(&[operation]).inc();
    }

    pub fn set_redis_status(status: RedisHealthStatus, circuit: CircuitState) {
        REDIS_CONNECTION_STATUS.set(i64::from(status == RedisHealthStatus::Healthy));
        REDIS_CIRCUIT_BREAKER_STATE.set(circuit.as_gauge());
    }
}
