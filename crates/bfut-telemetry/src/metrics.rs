//! Prometheus metrics for the bfut engine.
//!
//! Covers:
//! - Stream health (connected streams, reconnects, frames, parse errors)
//! - REST calls (outcome and latency per endpoint)
//! - Order flow and reconciliation gaps
//! - Subscriber and strategy dispatch failures
//! - Backtest runs
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. A registration failure
//! means duplicate metric names, which is a fatal startup error. These panics
//! only occur during static initialization, never at runtime.

use crate::error::{TelemetryError, TelemetryResult};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_histogram_vec, register_int_gauge_vec,
    Counter, CounterVec, Encoder, HistogramVec, IntGaugeVec, TextEncoder,
};

/// Streams currently connected.
/// Labels: kind (market/user)
pub static STREAM_CONNECTED: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "bfut_stream_connected",
        "Streams currently connected",
        &["kind"]
    )
    .unwrap()
});

/// Stream reconnections.
/// Labels: kind, reason (error/closed/idle/restart)
pub static STREAM_RECONNECT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "bfut_stream_reconnect_total",
        "Total stream reconnections",
        &["kind", "reason"]
    )
    .unwrap()
});

pub static STREAM_FRAMES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "bfut_stream_frames_total",
        "Total text frames received",
        &["kind"]
    )
    .unwrap()
});

pub static FRAME_PARSE_ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "bfut_frame_parse_errors_total",
        "Frames dropped because they could not be decoded",
        &["kind"]
    )
    .unwrap()
});

/// Listen keys renewed after expiry.
pub static LISTEN_KEY_RENEWALS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "bfut_listen_key_renewals_total",
        "Listen keys renewed after expiry"
    )
    .unwrap()
});

/// REST requests.
/// Labels: endpoint, outcome (ok/venue_error/transport_error/decode_error)
pub static REST_REQUESTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "bfut_rest_requests_total",
        "Total REST requests",
        &["endpoint", "outcome"]
    )
    .unwrap()
});

pub static REST_LATENCY_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "bfut_rest_latency_ms",
        "REST round-trip latency in milliseconds",
        &["endpoint"],
        vec![5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0]
    )
    .unwrap()
});

/// Order operations.
/// Labels: outcome (placed/place_failed/canceled/cancel_failed/filled)
pub static ORDERS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!("bfut_orders_total", "Order operations", &["outcome"]).unwrap()
});

/// Stream updates that referenced an order id never seen before.
pub static RECONCILIATION_GAPS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "bfut_reconciliation_gaps_total",
        "Order updates absorbed as floating records"
    )
    .unwrap()
});

/// Subscriber callbacks that failed or panicked.
/// Labels: channel
pub static SUBSCRIBER_FAILURES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "bfut_subscriber_failures_total",
        "Subscriber callbacks that returned an error or panicked",
        &["channel"]
    )
    .unwrap()
});

/// Strategy handler failures during dispatch.
/// Labels: strategy
pub static DISPATCH_FAILURES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "bfut_dispatch_failures_total",
        "Strategy handler failures during dispatch",
        &["strategy"]
    )
    .unwrap()
});

pub static BACKTEST_RUNS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!("bfut_backtest_runs_total", "Completed backtest runs").unwrap()
});

/// Metrics facade.
pub struct Metrics;

impl Metrics {
    pub fn stream_connected(kind: &str) {
        STREAM_CONNECTED.with_label_values(&[kind]).inc();
    }

    pub fn stream_disconnected(kind: &str) {
        STREAM_CONNECTED.with_label_values(&[kind]).dec();
    }

    pub fn stream_reconnect(kind: &str, reason: &str) {
        STREAM_RECONNECT_TOTAL
            .with_label_values(&[kind, reason])
            .inc();
    }

    pub fn frame_received(kind: &str) {
        STREAM_FRAMES_TOTAL.with_label_values(&[kind]).inc();
    }

    pub fn frame_parse_error(kind: &str) {
        FRAME_PARSE_ERRORS_TOTAL.with_label_values(&[kind]).inc();
    }

    pub fn listen_key_renewed() {
        LISTEN_KEY_RENEWALS_TOTAL.inc();
    }

    /// Record one REST round trip.
    pub fn rest_request(endpoint: &str, outcome: &str, latency_ms: f64) {
        REST_REQUESTS_TOTAL
            .with_label_values(&[endpoint, outcome])
            .inc();
        REST_LATENCY_MS
            .with_label_values(&[endpoint])
            .observe(latency_ms);
    }

    pub fn order_event(outcome: &str) {
        ORDERS_TOTAL.with_label_values(&[outcome]).inc();
    }

    pub fn reconciliation_gap() {
        RECONCILIATION_GAPS_TOTAL.inc();
    }

    pub fn subscriber_failure(channel: &str) {
        SUBSCRIBER_FAILURES_TOTAL.with_label_values(&[channel]).inc();
    }

    pub fn dispatch_failure(strategy: &str) {
        DISPATCH_FAILURES_TOTAL.with_label_values(&[strategy]).inc();
    }

    pub fn backtest_run() {
        BACKTEST_RUNS_TOTAL.inc();
    }

    /// Render the default registry in the Prometheus text format.
    pub fn encode() -> TelemetryResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&prometheus::gather(), &mut buffer)
            .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| TelemetryError::Metrics(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_gauge_tracks_open_streams() {
        let before = STREAM_CONNECTED.with_label_values(&["test_kind"]).get();
        Metrics::stream_connected("test_kind");
        Metrics::stream_connected("test_kind");
        Metrics::stream_disconnected("test_kind");
        assert_eq!(
            STREAM_CONNECTED.with_label_values(&["test_kind"]).get(),
            before + 1
        );
    }

    #[test]
    fn test_rest_request_records_counter_and_latency() {
        Metrics::rest_request("/v1/test", "ok", 12.0);
        assert!(
            REST_REQUESTS_TOTAL
                .with_label_values(&["/v1/test", "ok"])
                .get()
                >= 1.0
        );
        assert!(
            REST_LATENCY_MS
                .with_label_values(&["/v1/test"])
                .get_sample_count()
                >= 1
        );
    }

    #[test]
    fn test_encode_contains_registered_metrics() {
        Metrics::reconciliation_gap();
        Metrics::backtest_run();
        let text = Metrics::encode().unwrap();
        assert!(text.contains("bfut_reconciliation_gaps_total"));
        assert!(text.contains("bfut_backtest_runs_total"));
    }
}
