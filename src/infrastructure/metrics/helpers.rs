//! Metrics helper structs for convenient metric recording

use std::time::Duration;

use prometheus::{Encoder, TextEncoder};

use super::{
    API_REQUESTS_TOTAL, API_REQUEST_DURATION, MESSAGES_RECEIVED_TOTAL, MESSAGE_PARSE_FAILURES,
    REALTIME_CONNECTED, REALTIME_CONNECT_ATTEMPTS, REALTIME_TRANSITIONS_TOTAL,
    TOKEN_REFRESHES_TOTAL,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording realtime connection metrics
pub struct RealtimeMetrics;

impl RealtimeMetrics {
    /// Record a transition into `state`
    pub fn record_transition(state: &str, connected: bool) {
        REALTIME_TRANSITIONS_TOTAL.with_label_values(&[state]).inc();
        REALTIME_CONNECTED.set(i64::from(connected));
    }

    /// Record a transport open attempt
    pub fn record_connect_attempt() {
        REALTIME_CONNECT_ATTEMPTS.inc();
    }

    /// Record an inbound message on a destination
    pub fn record_message(destination: &str) {
        MESSAGES_RECEIVED_TOTAL
            .with_label_values(&[destination])
            .inc();
    }

    /// Record an inbound message dropped because it failed to parse
    pub fn record_parse_failure() {
        MESSAGE_PARSE_FAILURES.inc();
    }
}

/// Helper struct for token refresh metrics
pub struct TokenMetrics;

impl TokenMetrics {
    pub fn record_refreshed() {
        TOKEN_REFRESHES_TOTAL.with_label_values(&["refreshed"]).inc();
    }

    pub fn record_failed() {
        TOKEN_REFRESHES_TOTAL.with_label_values(&["failed"]).inc();
    }
}

/// Helper struct for REST request metrics
pub struct ApiMetrics;

impl ApiMetrics {
    /// Record a completed request; `status` is `None` when no response arrived
    pub fn record_request(method: &str, status: Option<u16>, elapsed: Duration) {
        let status = match status {
            Some(code) => format!("{}xx", code / 100),
            None => "error".to_string(),
        };
        API_REQUESTS_TOTAL
            .with_label_values(&[method, status.as_str()])
            .inc();
        API_REQUEST_DURATION
            .with_label_values(&[method])
            .observe(elapsed.as_secs_f64());
    }
}
