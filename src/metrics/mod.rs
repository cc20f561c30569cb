//! Prometheus metrics for the relay hub.
//!
//! Connection lifecycle, broadcast throughput, and per-recipient delivery
//! failures, exported in text format at `/metrics`.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "relay";

lazy_static! {
    /// Number of currently registered connections
    pub static ref CONNECTIONS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_connections_active", METRIC_PREFIX),
        "Number of currently registered WebSocket connections"
    ).unwrap();

    /// Total connections accepted over the process lifetime
    pub static ref CONNECTIONS_OPENED: IntCounter = register_int_counter!(
        format!("{}_connections_opened_total", METRIC_PREFIX),
        "Total WebSocket connections opened"
    ).unwrap();

    /// Total connections closed over the process lifetime
    pub static ref CONNECTIONS_CLOSED: IntCounter = register_int_counter!(
        format!("{}_connections_closed_total", METRIC_PREFIX),
        "Total WebSocket connections closed"
    ).unwrap();

    /// Connection lifetime distribution
    pub static ref CONNECTION_DURATION: Histogram = register_histogram!(
        format!("{}_connection_duration_seconds", METRIC_PREFIX),
        "WebSocket connection duration in seconds",
        vec![0.1, 1.0, 10.0, 60.0, 300.0, 1800.0, 7200.0]
    ).unwrap();

    /// Messages accepted onto the intake queue
    pub static ref MESSAGES_PUBLISHED: IntCounter = register_int_counter!(
        format!("{}_messages_published_total", METRIC_PREFIX),
        "Total messages accepted for broadcast"
    ).unwrap();

    /// Successful per-recipient deliveries
    pub static ref MESSAGES_DELIVERED: IntCounter = register_int_counter!(
        format!("{}_messages_delivered_total", METRIC_PREFIX),
        "Total messages successfully handed to recipient connections"
    ).unwrap();

    /// Per-recipient delivery failures by reason
    pub static ref DELIVERY_FAILURES: IntCounterVec = register_int_counter_vec!(
        format!("{}_delivery_failures_total", METRIC_PREFIX),
        "Total per-recipient delivery failures",
        &["reason"]
    ).unwrap();

    /// Time spent fanning one message out to a registry snapshot
    pub static ref BROADCAST_ROUND_DURATION: Histogram = register_histogram!(
        format!("{}_broadcast_round_duration_seconds", METRIC_PREFIX),
        "Duration of one broadcast round in seconds",
        vec![0.00001, 0.0001, 0.001, 0.01, 0.1, 1.0]
    ).unwrap();
}

/// Encode all registered metrics in Prometheus text format.
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&families, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
