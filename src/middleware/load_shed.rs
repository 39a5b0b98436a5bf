//! Adaptive load shedding: rolling latency/error/throughput metrics drive
//! one of four shedding strategies. The rolling-sample window follows the
//! same "bounded ring of recent observations" idiom used by the circuit
//! breaker's sliding window.

use crate::config::LoadShedConfig;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::handler::{Middleware, Next};
use async_trait::async_trait;
use rand::Rng;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Instant;

struct Sample {
    latency_ms: u64,
    success: bool,
}

struct Metrics {
    samples: Mutex<VecDeque<Sample>>,
    active: AtomicUsize,
    current_rate_millis: AtomicI64,
}

impl Metrics {
    fn new() -> Self {
        Self {
            samples: Mutex::new(VecDeque::new()),
            active: AtomicUsize::new(0),
            current_rate_millis: AtomicI64::new(0),
        }
    }

    fn record(&self, window: usize, latency_ms: u64, success: bool) {
        let mut samples = self.samples.lock().unwrap();
        samples.push_back(Sample { latency_ms, success });
        while samples.len() > window {
            samples.pop_front();
        }
    }

    fn average_latency_ms(&self) -> f64 {
        let samples = self.samples.lock().unwrap();
        if samples.is_empty() {
            return 0.0;
        }
        samples.iter().map(|s| s.latency_ms as f64).sum::<f64>() / samples.len() as f64
    }

    fn error_rate(&self) -> f64 {
        let samples = self.samples.lock().unwrap();
        if samples.is_empty() {
            return 0.0;
        }
        let errors = samples.iter().filter(|s| !s.success).count() as f64;
        errors / samples.len() as f64
    }
}

/// Optional external system signals consulted by the `circuit` strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemSignals {
    pub cpu_overloaded: bool,
    pub memory_overloaded: bool,
}

pub struct LoadShed {
    config: LoadShedConfig,
    metrics: Metrics,
    signals: SystemSignals,
    priority: Box<dyn Fn(&Context) -> u8 + Send + Sync>,
}

impl LoadShed {
    pub fn new(config: LoadShedConfig) -> Self {
        Self {
            config,
            metrics: Metrics::new(),
            signals: SystemSignals::default(),
            priority: Box::new(|_| 0),
        }
    }

    pub fn with_priority_fn(mut self, f: impl Fn(&Context) -> u8 + Send + Sync + 'static) -> Self {
        self.priority = Box::new(f);
        self
    }

    pub fn with_signals(mut self, signals: SystemSignals) -> Self {
        self.signals = signals;
        self
    }

    fn shed_rate(&self, ctx: &Context) -> f64 {
        match self.config.strategy.as_str() {
            "priority" => {
                let base = self.base_rate();
                let priority = self.priority.as_ref()(ctx) as f64;
                base / (1.0 + priority * 0.1)
            }
            "adaptive" => self.adaptive_rate(),
            "circuit" => {
                let overloaded = [
                    self.signals.cpu_overloaded,
                    self.signals.memory_overloaded,
                    self.metrics.average_latency_ms() > self.config.target_latency_ms as f64,
                    self.metrics.error_rate() > self.config.max_rate,
                ]
                .iter()
                .filter(|b| **b)
                .count();
                0.25 * overloaded as f64
            }
            _ => self.base_rate(),
        }
    }

    fn base_rate(&self) -> f64 {
        let stored = self.metrics.current_rate_millis.load(Ordering::SeqCst);
        if stored > 0 {
            stored as f64 / 1000.0
        } else {
            self.config.min_rate
        }
    }

    fn adaptive_rate(&self) -> f64 {
        let current = self.base_rate();
        let observed_latency = self.metrics.average_latency_ms();
        let next = if observed_latency > self.config.target_latency_ms as f64 {
            (current + self.config.adaptation_rate).min(self.config.max_rate)
        } else {
            (current - self.config.adaptation_rate).max(self.config.min_rate)
        };
        self.metrics
            .current_rate_millis
            .store((next * 1000.0).round() as i64, Ordering::SeqCst);
        next
    }
}

#[async_trait]
impl Middleware for LoadShed {
    async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<()> {
        if !self.config.enabled {
            return next.run(ctx).await;
        }

        let rate = self.shed_rate(ctx).clamp(0.0, 1.0);
        if rand::rng().random_bool(rate) {
            return Err(Error::LoadShed);
        }

        self.metrics.active.fetch_add(1, Ordering::SeqCst);
        let started = Instant::now();
        let result = next.run(ctx).await;
        self.metrics.active.fetch_sub(1, Ordering::SeqCst);

        let latency_ms = started.elapsed().as_millis() as u64;
        let success = result.is_ok();
        self.metrics.record(self.config.sample_window, latency_ms, success);

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::system;
    use crate::handler::{Handler, Recover};
    use crate::observability::NoopMetrics;
    use crate::request::{Request, TriggerSource};
    use crate::response::Response;
    use std::sync::Arc;

    struct Ok200;
    #[async_trait]
    impl Handler for Ok200 {
        async fn call(&self, ctx: &mut Context) -> Result<()> {
            ctx.response = Response::with_status(200);
            Ok(())
        }
    }

    async fn invoke(shed: &LoadShed) -> Result<()> {
        let mut ctx = Context::new(
            Request::new("GET", "/x", TriggerSource::HttpV1),
            system(),
            Arc::new(NoopMetrics),
        );
        let handler = Ok200;
        let recover: Arc<dyn Middleware> = Arc::new(Recover);
        let chain = [recover];
        let next = Next::new(&chain, &handler);
        shed.handle(&mut ctx, next).await
    }

    #[tokio::test]
    async fn zero_min_rate_never_sheds() {
        let mut config = LoadShedConfig::default();
        config.enabled = true;
        config.strategy = "random".into();
        config.min_rate = 0.0;
        let shed = LoadShed::new(config);
        for _ in 0..20 {
            assert!(invoke(&shed).await.is_ok());
        }
    }

    #[tokio::test]
    async fn disabled_never_sheds_regardless_of_rate() {
        let mut config = LoadShedConfig::default();
        config.enabled = false;
        config.min_rate = 1.0;
        let shed = LoadShed::new(config);
        assert!(invoke(&shed).await.is_ok());
    }

    #[test]
    fn circuit_strategy_scales_with_overloaded_signal_count() {
        let mut config = LoadShedConfig::default();
        config.strategy = "circuit".into();
        let shed = LoadShed::new(config).with_signals(SystemSignals {
            cpu_overloaded: true,
            memory_overloaded: true,
        });
        let ctx = Context::new(
            Request::new("GET", "/x", TriggerSource::HttpV1),
            system(),
            Arc::new(NoopMetrics),
        );
        assert!((shed.shed_rate(&ctx) - 0.5).abs() < 1e-9);
    }
}
