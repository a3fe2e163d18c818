//! Prometheus metrics for the scheduler
//!
//! This module provides metrics tracking for:
//! - Dispatches and their final outcomes
//! - Individual task executions, rate limiting and proxy swaps
//! - Store persistence failures
//! - Per-tick identity counts (due, cooling, suspended)
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

pub mod server;

use prometheus::{
    register_counter, register_counter_vec, register_gauge_vec, register_histogram, Counter,
    CounterVec, Encoder, GaugeVec, Histogram, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for all scheduler metrics
struct SchedulerMetrics {
    ticks: Counter,
    dispatches: CounterVec,
    dispatch_duration: Histogram,
    task_executions: CounterVec,
    rate_limited: Counter,
    proxy_swaps: Counter,
    backup_exhausted: Counter,
    persist_errors: CounterVec,
    identities: GaugeVec,
}

/// Global storage for scheduler metrics
static SCHEDULER_METRICS: OnceLock<SchedulerMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// This function should be called once at application startup.
/// If metric registration fails, subsequent metric operations become no-ops.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = cycler::metrics::init_metrics() {
///     eprintln!("Warning: Metrics initialization failed: {}", e);
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    // Prevent double initialization
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let metrics = SchedulerMetrics {
        ticks: register_counter!("cycler_ticks_total", "Total scheduling ticks completed")?,
        dispatches: register_counter_vec!(
            "cycler_dispatches_total",
            "Total dispatches by final outcome",
            &["outcome"]
        )?,
        dispatch_duration: register_histogram!(
            "cycler_dispatch_duration_seconds",
            "Time spent dispatching one identity, retries included",
            vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0, 120.0]
        )?,
        task_executions: register_counter_vec!(
            "cycler_task_executions_total",
            "Total executor calls by outcome",
            &["outcome"]
        )?,
        rate_limited: register_counter!(
            "cycler_rate_limited_total",
            "Total executor calls answered with a rate limit"
        )?,
        proxy_swaps: register_counter!(
            "cycler_proxy_swaps_total",
            "Total proxies moved from the backup reserve into a slot"
        )?,
        backup_exhausted: register_counter!(
            "cycler_backup_exhausted_total",
            "Total failovers that found the backup reserve empty"
        )?,
        persist_errors: register_counter_vec!(
            "cycler_persist_errors_total",
            "Total failed writes by store",
            &["store"]
        )?,
        identities: register_gauge_vec!(
            "cycler_identities",
            "Identities by state at the end of the last tick",
            &["state"]
        )?,
    };

    SCHEDULER_METRICS
        .set(metrics)
        .map_err(|_| "Scheduler metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    SCHEDULER_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
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

/// Start a dispatch timer (records when dropped)
pub fn start_dispatch_timer() -> MetricsTimer {
    match SCHEDULER_METRICS.get() {
        Some(m) => MetricsTimer::new(m.dispatch_duration.start_timer()),
        None => MetricsTimer::noop(),
    }
}

/// Record the final outcome of a dispatch
pub fn record_dispatch(outcome: &str) {
    if let Some(m) = SCHEDULER_METRICS.get() {
        m.dispatches.with_label_values(&[outcome]).inc();
    }
}

/// Record one executor call
pub fn record_task_execution(outcome: &str) {
    if let Some(m) = SCHEDULER_METRICS.get() {
        m.task_executions.with_label_values(&[outcome]).inc();
    }
}

/// Record an executor call answered with a rate limit
pub fn record_rate_limited() {
    if let Some(m) = SCHEDULER_METRICS.get() {
        m.rate_limited.inc();
    }
}

/// Record a backup proxy moved into a slot
pub fn record_proxy_swap() {
    if let Some(m) = SCHEDULER_METRICS.get() {
        m.proxy_swaps.inc();
    }
}

/// Record a failover that found the reserve empty
pub fn record_backup_exhausted() {
    if let Some(m) = SCHEDULER_METRICS.get() {
        m.backup_exhausted.inc();
    }
}

/// Record a failed write to `store`
pub fn record_persist_error(store: &str) {
    if let Some(m) = SCHEDULER_METRICS.get() {
        m.persist_errors.with_label_values(&[store]).inc();
    }
}

/// Record a completed tick and the identity counts it saw
pub fn record_tick(due: usize, cooling: usize, suspended: usize) {
    let Some(m) = SCHEDULER_METRICS.get() else {
        return;
    };

    m.ticks.inc();
    m.identities.with_label_values(&["due"]).set(due as f64);
    m.identities.with_label_values(&["cooling"]).set(cooling as f64);
    m.identities
        .with_label_values(&["suspended"])
        .set(suspended as f64);
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
    fn test_metrics_initialized() {
        ensure_metrics_initialized();
        assert!(metrics_initialized());
    }

    #[test]
    fn test_encode_metrics() {
        ensure_metrics_initialized();
        record_dispatch("success");
        let text = encode_metrics().unwrap();
        assert!(text.contains("cycler_dispatches_total"));
    }

    #[test]
    fn test_recording_does_not_panic() {
        ensure_metrics_initialized();
        record_task_execution("rate_limited");
        record_rate_limited();
        record_proxy_swap();
        record_backup_exhausted();
        record_persist_error("cooldowns");
        record_tick(1, 2, 0);
        let _timer = start_dispatch_timer();
    }
}
