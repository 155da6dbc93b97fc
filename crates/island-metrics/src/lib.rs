//! Prometheus metrics for the island bus
//!
//! Provides centralized metrics collection for monitoring:
//! - Request dispatch and reply outcomes
//! - Frames dropped at the listener boundary
//! - Read cache and idempotency effectiveness
//! - Event notifications

use anyhow::Result;
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramVec, IntCounter, IntCounterVec, TextEncoder, opts, register_histogram_vec,
    register_int_counter, register_int_counter_vec,
};

// ============================================================================
// Request Metrics
// ============================================================================

/// Requests published, by operation
pub static REQUESTS_SENT_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "island_bus_requests_sent_total",
            "Total number of requests published to the bus"
        ),
        &["operation"]
    )
    .expect("Failed to register REQUESTS_SENT_TOTAL metric")
});

/// How each awaited request ended
/// (ok, business_error, timeout, internal, shutting_down, transport_lost)
pub static REPLIES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "island_bus_replies_total",
            "Outcome of requests awaiting a reply"
        ),
        &["outcome"]
    )
    .expect("Failed to register REPLIES_TOTAL metric")
});

/// Time from publish to correlated reply
pub static REQUEST_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "island_bus_request_duration_seconds",
        "Request round-trip duration in seconds",
        &["operation"]
    )
    .expect("Failed to register REQUEST_DURATION_SECONDS metric")
});

// ============================================================================
// Listener Metrics
// ============================================================================

/// Inbound frames dropped before reaching any consumer (decode, auth, kind, unroutable)
pub static FRAMES_DROPPED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "island_bus_frames_dropped_total",
            "Inbound frames dropped at the listener boundary"
        ),
        &["reason"]
    )
    .expect("Failed to register FRAMES_DROPPED_TOTAL metric")
});

/// Event notifications received, by event type
pub static EVENTS_RECEIVED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "island_bus_events_received_total",
            "Verified event notifications received"
        ),
        &["event_type"]
    )
    .expect("Failed to register EVENTS_RECEIVED_TOTAL metric")
});

// ============================================================================
// Cache Metrics
// ============================================================================

/// Read cache lookups (hit, miss)
pub static CACHE_LOOKUPS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!("island_bus_cache_lookups_total", "Read cache lookups"),
        &["result"]
    )
    .expect("Failed to register CACHE_LOOKUPS_TOTAL metric")
});

/// Write operations answered from a stored idempotency record
pub static IDEMPOTENCY_HITS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "island_bus_idempotency_hits_total",
        "Write operations answered from a stored idempotency record"
    ))
    .expect("Failed to register IDEMPOTENCY_HITS_TOTAL metric")
});

// ============================================================================
// Metrics Collection
// ============================================================================

/// Gather all registered metrics and encode as Prometheus text format
pub fn gather_metrics() -> Result<String> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode(&metric_families, &mut buffer)?;

    Ok(String::from_utf8(buffer)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_metrics() {
        REQUESTS_SENT_TOTAL.with_label_values(&["island.get"]).inc();
        IDEMPOTENCY_HITS_TOTAL.inc();

        let metrics_text = gather_metrics().unwrap();
        assert!(metrics_text.contains("island_bus_requests_sent_total"));
        assert!(metrics_text.contains("island_bus_idempotency_hits_total"));
    }
}
