//! Observability for the synchronizer
//!
//! Provides:
//! - Prometheus metrics for registry exchanges and sync errors
//! - Tracing subscriber setup with JSON or plain output

use crate::sync::{Operation, StatsRecorder};
use anyhow::Result;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec,
    TextEncoder,
};
use std::sync::OnceLock;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Histogram buckets for registry round trips (in seconds)
const LATENCY_BUCKETS: &[f64] = &[0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<SyncMetricsInner> = OnceLock::new();

struct SyncMetricsInner {
    errors_total: IntCounterVec,
    exchanges_total: IntCounterVec,
    exchange_latency_seconds: HistogramVec,
}

impl SyncMetricsInner {
    fn new() -> Self {
        Self {
            errors_total: register_int_counter_vec!(
                "installation_sync_errors_total",
                "Failed installation exchanges by stats counter",
                &["counter"]
            )
            .expect("Failed to register errors_total"),

            exchanges_total: register_int_counter_vec!(
                "installation_sync_exchanges_total",
                "Installation registry exchanges by operation and outcome",
                &["operation", "outcome"]
            )
            .expect("Failed to register exchanges_total"),

            exchange_latency_seconds: register_histogram_vec!(
                "installation_sync_exchange_latency_seconds",
                "Time from first attempt to final outcome of a registry exchange",
                &["operation"],
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register exchange_latency_seconds"),
        }
    }
}

/// Prometheus backed [`StatsRecorder`]
///
/// A lightweight handle to the global metrics instance; every handle shares
/// the same underlying collectors.
#[derive(Clone)]
pub struct SyncMetrics {
    inner: &'static SyncMetricsInner,
}

impl Default for SyncMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self {
            inner: GLOBAL_METRICS.get_or_init(SyncMetricsInner::new),
        }
    }

    pub fn error_count(&self, counter: &str) -> u64 {
        self.inner.errors_total.with_label_values(&[counter]).get()
    }

    pub fn exchange_count(&self, operation: Operation, success: bool) -> u64 {
        self.inner
            .exchanges_total
            .with_label_values(&[operation.as_str(), outcome(success)])
            .get()
    }

    /// Render every registered metric in the Prometheus text format
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

impl StatsRecorder for SyncMetrics {
    fn record_error(&self, counter: &str) {
        self.inner.errors_total.with_label_values(&[counter]).inc();
    }

    fn record_exchange(&self, operation: Operation, success: bool, elapsed: Duration) {
        self.inner
            .exchanges_total
            .with_label_values(&[operation.as_str(), outcome(success)])
            .inc();
        self.inner
            .exchange_latency_seconds
            .with_label_values(&[operation.as_str()])
            .observe(elapsed.as_secs_f64());
    }
}

fn outcome(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "failure"
    }
}

/// Install the global tracing subscriber, filtered by `RUST_LOG` (default `info`)
pub fn init_tracing(json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(fmt::layer().json()).try_init()?;
    } else {
        registry.with(fmt::layer()).try_init()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::REGISTRATION_SYNC_ERROR;

    #[test]
    fn test_metrics_handles_share_collectors() {
        let first = SyncMetrics::new();
        let second = SyncMetrics::default();

        let before = second.error_count(REGISTRATION_SYNC_ERROR);
        first.record_error(REGISTRATION_SYNC_ERROR);
        assert!(second.error_count(REGISTRATION_SYNC_ERROR) >= before + 1);
    }

    #[test]
    fn test_record_exchange() {
        let metrics = SyncMetrics::new();
        let before = metrics.exchange_count(Operation::Fetch, false);

        metrics.record_exchange(Operation::Fetch, false, Duration::from_millis(40));

        assert!(metrics.exchange_count(Operation::Fetch, false) >= before + 1);
        let text = metrics.render().unwrap();
        assert!(text.contains("installation_sync_exchange_latency_seconds"));
    }
}
