//! Prometheus metrics for the client.
//!
//! - Realtime connection metrics (state transitions, attempts, connected gauge)
//! - Inbound message metrics (received, parse failures, dispatched)
//! - Token refresh metrics
//! - REST request metrics

mod helpers;

pub use helpers::{encode_metrics, ApiMetrics, RealtimeMetrics, TokenMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    HistogramVec, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "pm_client";

lazy_static! {
    // ============================================================================
    // Realtime Connection Metrics
    // ============================================================================

    /// State transitions of the realtime connection, by target state
    pub static ref REALTIME_TRANSITIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_realtime_transitions_total", METRIC_PREFIX),
        "Realtime connection state transitions",
        &["state"]
    ).unwrap();

    /// Transport open attempts
    pub static ref REALTIME_CONNECT_ATTEMPTS: IntCounter = register_int_counter!(
        format!("{}_realtime_connect_attempts_total", METRIC_PREFIX),
        "Total realtime transport open attempts"
    ).unwrap();

    /// 1 while the realtime link is connected
    pub static ref REALTIME_CONNECTED: IntGauge = register_int_gauge!(
        format!("{}_realtime_connected", METRIC_PREFIX),
        "Whether the realtime link is connected"
    ).unwrap();

    // ============================================================================
    // Inbound Message Metrics
    // ============================================================================

    /// Inbound messages by destination
    pub static ref MESSAGES_RECEIVED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_messages_received_total", METRIC_PREFIX),
        "Inbound realtime messages",
        &["destination"]
    ).unwrap();

    /// Inbound messages dropped because the body was not valid JSON
    pub static ref MESSAGE_PARSE_FAILURES: IntCounter = register_int_counter!(
        format!("{}_message_parse_failures_total", METRIC_PREFIX),
        "Inbound realtime messages dropped due to parse errors"
    ).unwrap();

    // ============================================================================
    // Token Metrics
    // ============================================================================

    /// Token refresh exchanges by outcome
    pub static ref TOKEN_REFRESHES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_token_refreshes_total", METRIC_PREFIX),
        "Token refresh exchanges with the identity provider",
        &["outcome"]
    ).unwrap();

    // ============================================================================
    // REST Metrics
    // ============================================================================

    /// REST requests by method and status class
    pub static ref API_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_api_requests_total", METRIC_PREFIX),
        "REST requests sent to the backend",
        &["method", "status"]
    ).unwrap();

    /// REST request latency in seconds
    pub static ref API_REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        format!("{}_api_request_duration_seconds", METRIC_PREFIX),
        "REST request latency",
        &["method"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    ).unwrap();
}
