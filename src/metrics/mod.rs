//! Prometheus metrics for memberwatch
//!
//! This module provides metrics tracking for:
//! - Discovery: reconcile cycles, wakes, instance events, fetch latency and errors
//! - Mapping: monitored endpoints, URI construction failures, HTTP requests
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec,
    CounterVec, Encoder, Gauge, GaugeVec, HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

use crate::models::{ConnectionState, InstanceStatus};

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for per-path discovery metrics
struct DiscoveryMetrics {
    cycles: CounterVec,
    wakes: CounterVec,
    instance_events: CounterVec,
    members: GaugeVec,
    fetch_errors: CounterVec,
    fetch_duration: HistogramVec,
    watch_failures: CounterVec,
    connection_states: CounterVec,
}

/// Container for mapping and HTTP metrics
struct EndpointMetrics {
    endpoints: Gauge,
    mapping_failures: CounterVec,
    api_requests: CounterVec,
    api_duration: HistogramVec,
}

static DISCOVERY_METRICS: OnceLock<DiscoveryMetrics> = OnceLock::new();

static ENDPOINT_METRICS: OnceLock<EndpointMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// Safe to call more than once. If registration fails the error is returned
/// and every recording function stays a no-op.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = memberwatch::metrics::init_metrics() {
///     eprintln!("Warning: Metrics initialization failed: {}", e);
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let discovery = DiscoveryMetrics {
        cycles: register_counter_vec!(
            "memberwatch_reconcile_cycles_total",
            "Total reconciliation cycles by path",
            &["path"]
        )?,
        wakes: register_counter_vec!(
            "memberwatch_wakes_total",
            "Total loop wake-ups by path and kind",
            &["path", "kind"]
        )?,
        instance_events: register_counter_vec!(
            "memberwatch_instance_events_total",
            "Total instance events emitted by path and status",
            &["path", "status"]
        )?,
        members: register_gauge_vec!(
            "memberwatch_members",
            "Members present at the last reconciliation",
            &["path"]
        )?,
        fetch_errors: register_counter_vec!(
            "memberwatch_fetch_errors_total",
            "Total child listing failures by path",
            &["path"]
        )?,
        fetch_duration: register_histogram_vec!(
            "memberwatch_fetch_duration_seconds",
            "Child listing duration in seconds",
            &["path"],
            vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
        )?,
        watch_failures: register_counter_vec!(
            "memberwatch_watch_failures_total",
            "Total failed child watch registrations by path",
            &["path"]
        )?,
        connection_states: register_counter_vec!(
            "memberwatch_connection_state_changes_total",
            "Total connection state transitions observed",
            &["state"]
        )?,
    };

    let endpoint = EndpointMetrics {
        endpoints: register_gauge!(
            "memberwatch_endpoints",
            "Number of monitored stream endpoints"
        )?,
        mapping_failures: register_counter_vec!(
            "memberwatch_mapping_failures_total",
            "Total instances whose URI could not be built",
            &["path"]
        )?,
        api_requests: register_counter_vec!(
            "memberwatch_api_requests_total",
            "Total API requests by endpoint and status",
            &["endpoint", "status"]
        )?,
        api_duration: register_histogram_vec!(
            "memberwatch_api_request_duration_seconds",
            "API request duration in seconds",
            &["endpoint"],
            vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
        )?,
    };

    DISCOVERY_METRICS
        .set(discovery)
        .map_err(|_| "Discovery metrics already initialized")?;
    ENDPOINT_METRICS
        .set(endpoint)
        .map_err(|_| "Endpoint metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    DISCOVERY_METRICS.get().is_some() && ENDPOINT_METRICS.get().is_some()
}

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

// ============================================================================
// Discovery
// ============================================================================

pub fn record_cycle(path: &str) {
    if let Some(m) = DISCOVERY_METRICS.get() {
        m.cycles.with_label_values(&[path]).inc();
    }
}

/// Record a loop wake-up (`child`, `resync`, `timeout`, `interrupted`)
pub fn record_wake(path: &str, kind: &str) {
    if let Some(m) = DISCOVERY_METRICS.get() {
        m.wakes.with_label_values(&[path, kind]).inc();
    }
}

pub fn record_instance_event(path: &str, status: InstanceStatus) {
    if let Some(m) = DISCOVERY_METRICS.get() {
        m.instance_events
            .with_label_values(&[path, status.as_str()])
            .inc();
    }
}

pub fn set_members(path: &str, count: usize) {
    if let Some(m) = DISCOVERY_METRICS.get() {
        m.members.with_label_values(&[path]).set(count as f64);
    }
}

pub fn record_fetch_error(path: &str) {
    if let Some(m) = DISCOVERY_METRICS.get() {
        m.fetch_errors.with_label_values(&[path]).inc();
    }
}

pub fn record_watch_failure(path: &str) {
    if let Some(m) = DISCOVERY_METRICS.get() {
        m.watch_failures.with_label_values(&[path]).inc();
    }
}

pub fn record_connection_state(state: ConnectionState) {
    if let Some(m) = DISCOVERY_METRICS.get() {
        m.connection_states
            .with_label_values(&[state.as_str()])
            .inc();
    }
}

/// Histogram timer guard that records duration on drop
pub struct MetricsTimer {
    timer: Option<prometheus::HistogramTimer>,
}

impl MetricsTimer {
    fn new(timer: prometheus::HistogramTimer) -> Self {
        Self { timer: Some(timer) }
    }

    /// Create a no-op timer when metrics are not initialized
    fn noop() -> Self {
        Self { timer: None }
    }
}

impl Drop for MetricsTimer {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.stop_and_record();
        }
    }
}

/// Start timing a child listing
pub fn start_fetch_timer(path: &str) -> MetricsTimer {
    match DISCOVERY_METRICS.get() {
        Some(m) => MetricsTimer::new(m.fetch_duration.with_label_values(&[path]).start_timer()),
        None => MetricsTimer::noop(),
    }
}

// ============================================================================
// Endpoints
// ============================================================================

pub fn set_endpoints(count: usize) {
    if let Some(m) = ENDPOINT_METRICS.get() {
        m.endpoints.set(count as f64);
    }
}

pub fn record_mapping_failure(path: &str) {
    if let Some(m) = ENDPOINT_METRICS.get() {
        m.mapping_failures.with_label_values(&[path]).inc();
    }
}

/// Record API request
pub fn record_api_request(endpoint: &str, status: u16, duration_secs: f64) {
    let Some(m) = ENDPOINT_METRICS.get() else {
        return;
    };

    let status_str = status.to_string();
    m.api_requests
        .with_label_values(&[endpoint, &status_str])
        .inc();
    m.api_duration
        .with_label_values(&[endpoint])
        .observe(duration_secs);
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ensure_metrics_initialized() {
        let _ = init_metrics();
    }

    #[test]
    fn test_init_metrics_idempotent() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
    }

    #[test]
    fn test_encode_metrics() {
        ensure_metrics_initialized();
        record_cycle("/encode");
        let text = encode_metrics().unwrap();
        assert!(text.contains("memberwatch_reconcile_cycles_total"));
    }

    #[test]
    fn test_discovery_metrics() {
        ensure_metrics_initialized();
        assert!(metrics_initialized());

        record_wake("/service", "child");
        record_instance_event("/service", InstanceStatus::Up);
        set_members("/service", 3);
        record_fetch_error("/service");
        record_watch_failure("/service");
        record_connection_state(ConnectionState::Reconnected);
        let _timer = start_fetch_timer("/service");
    }

    #[test]
    fn test_endpoint_metrics() {
        ensure_metrics_initialized();
        set_endpoints(2);
        record_mapping_failure("/service");
        record_api_request("/health", 200, 0.002);
    }
}
