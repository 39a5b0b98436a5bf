//! Per-key circuit breaker: a `DashMap<String, Mutex<KeyState>>` state
//! machine (closed/open/half-open) tripped on consecutive-failure count or a
//! sliding-window error rate. Lift has no tower surface to hang an existing
//! circuit-breaker layer off of, so the state machine is hand-rolled here.

use crate::config::CircuitBreakerConfig;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::handler::{Middleware, Next};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open,
    HalfOpen,
}

struct KeyState {
    state: State,
    consecutive_failures: u32,
    consecutive_successes: u32,
    window: VecDeque<(i64, bool)>,
    next_retry_at: i64,
    half_open_probes: u32,
}

impl KeyState {
    fn new() -> Self {
        Self {
            state: State::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            window: VecDeque::new(),
            next_retry_at: 0,
            half_open_probes: 0,
        }
    }
}

pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    keys: DashMap<String, Mutex<KeyState>>,
    classify_failure: Box<dyn Fn(&Context) -> bool + Send + Sync>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            keys: DashMap::new(),
            classify_failure: Box::new(|ctx| (400..600).contains(&ctx.response.status())),
        }
    }

    /// Overrides what counts as a failure for tripping purposes. Defaults to
    /// "response status is 4xx/5xx"; an `Err` result from the handler chain
    /// is always classified as a failure regardless of this hook.
    pub fn with_failure_classifier(mut self, f: impl Fn(&Context) -> bool + Send + Sync + 'static) -> Self {
        self.classify_failure = Box::new(f);
        self
    }

    fn key_for(&self, ctx: &Context) -> String {
        let mut parts = vec![self.name.clone()];
        if !ctx.tenant_id.is_empty() {
            parts.push(ctx.tenant_id.clone());
        }
        parts.push(ctx.request.path.clone());
        parts.join(":")
    }

    /// Returns `Ok(true)` if the call should proceed (closed, or a half-open
    /// probe was admitted), `Ok(false)` if it must be rejected immediately.
    fn admit(&self, key: &str, now: i64) -> bool {
        let entry = self.keys.entry(key.to_string()).or_insert_with(|| Mutex::new(KeyState::new()));
        let mut state = entry.lock().unwrap();

        match state.state {
            State::Closed => true,
            State::Open => {
                if now >= state.next_retry_at {
                    state.state = State::HalfOpen;
                    state.half_open_probes = 1;
                    true
                } else {
                    false
                }
            }
            State::HalfOpen => {
                if state.half_open_probes < self.config.max_retry_attempts {
                    state.half_open_probes += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn record(&self, key: &str, now: i64, success: bool) {
        let entry = self.keys.entry(key.to_string()).or_insert_with(|| Mutex::new(KeyState::new()));
        let mut state = entry.lock().unwrap();

        state.window.push_back((now, success));
        while state.window.len() > self.config.sliding_window_size {
            state.window.pop_front();
        }

        match state.state {
            State::Closed => {
                if success {
                    state.consecutive_failures = 0;
                } else {
                    state.consecutive_failures += 1;
                    let window_len = state.window.len() as u32;
                    let failures_in_window = state.window.iter().filter(|(_, ok)| !ok).count() as f64;
                    let ratio = if window_len > 0 {
                        failures_in_window / window_len as f64
                    } else {
                        0.0
                    };
                    let trip_on_consecutive = state.consecutive_failures >= self.config.failure_threshold;
                    let trip_on_ratio = window_len >= self.config.min_request_threshold
                        && ratio >= self.config.error_rate_threshold;
                    if trip_on_consecutive || trip_on_ratio {
                        state.state = State::Open;
                        state.next_retry_at = now + self.config.timeout_secs as i64;
                        state.consecutive_successes = 0;
                    }
                }
            }
            State::HalfOpen => {
                if success {
                    state.consecutive_successes += 1;
                    if state.consecutive_successes >= self.config.success_threshold {
                        state.state = State::Closed;
                        state.consecutive_failures = 0;
                        state.consecutive_successes = 0;
                        state.half_open_probes = 0;
                    }
                } else {
                    state.state = State::Open;
                    state.next_retry_at = now + self.config.timeout_secs as i64;
                    state.consecutive_successes = 0;
                    state.half_open_probes = 0;
                }
            }
            State::Open => {}
        }
    }
}

#[async_trait::async_trait]
impl Middleware for CircuitBreaker {
    async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<()> {
        if !self.config.enabled {
            return next.run(ctx).await;
        }

        let key = self.key_for(ctx);
        let now = ctx.clock().now().timestamp();

        if !self.admit(&key, now) {
            return Err(Error::CircuitOpen(key));
        }

        let result = next.run(ctx).await;
        let success = match &result {
            Ok(()) => !self.classify_failure.as_ref()(ctx),
            Err(_) => false,
        };
        self.record(&key, now, success);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{system, ManualClock};
    use crate::handler::Recover;
    use crate::observability::NoopMetrics;
    use crate::request::{Request, TriggerSource};
    use crate::response::Response;
    use std::sync::Arc;

    struct Flaky(Arc<std::sync::atomic::AtomicBool>);
    #[async_trait::async_trait]
    impl crate::handler::Handler for Flaky {
        async fn call(&self, ctx: &mut Context) -> Result<()> {
            if self.0.load(std::sync::atomic::Ordering::SeqCst) {
                ctx.response = Response::with_status(200);
                Ok(())
            } else {
                Err(Error::Internal("downstream failed".into()))
            }
        }
    }

    async fn invoke(cb: &CircuitBreaker, handler: &dyn crate::handler::Handler, ctx: &mut Context) -> Result<()> {
        let recover: std::sync::Arc<dyn Middleware> = Arc::new(Recover);
        let chain = [recover];
        let next = Next::new(&chain, handler);
        cb.handle(ctx, next).await
    }

    fn ctx() -> Context {
        Context::new(Request::new("GET", "/flaky", TriggerSource::HttpV1), system(), Arc::new(NoopMetrics))
    }

    #[tokio::test]
    async fn trips_after_failure_threshold_then_rejects_without_invoking_handler() {
        let mut config = CircuitBreakerConfig::default();
        config.failure_threshold = 3;
        let cb = CircuitBreaker::new("svc", config);
        let healthy = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let handler = Flaky(healthy.clone());

        for _ in 0..3 {
            let mut c = ctx();
            assert!(invoke(&cb, &handler, &mut c).await.is_err());
        }

        let mut c = ctx();
        let err = invoke(&cb, &handler, &mut c).await.unwrap_err();
        assert!(matches!(err, Error::CircuitOpen(_)));
    }

    #[tokio::test]
    async fn half_open_probe_after_timeout_closes_on_success() {
        let manual = Arc::new(ManualClock::default());
        let mut config = CircuitBreakerConfig::default();
        config.failure_threshold = 1;
        config.timeout_secs = 10;
        config.success_threshold = 1;
        let cb = CircuitBreaker::new("svc", config);
        let healthy = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let handler = Flaky(healthy.clone());

        let mut c = Context::new(
            Request::new("GET", "/flaky", TriggerSource::HttpV1),
            manual.clone() as crate::clock::SharedClock,
            Arc::new(NoopMetrics),
        );
        assert!(invoke(&cb, &handler, &mut c).await.is_err());

        let mut c2 = Context::new(
            Request::new("GET", "/flaky", TriggerSource::HttpV1),
            manual.clone() as crate::clock::SharedClock,
            Arc::new(NoopMetrics),
        );
        let err = invoke(&cb, &handler, &mut c2).await.unwrap_err();
        assert!(matches!(err, Error::CircuitOpen(_)));

        manual.advance(chrono::Duration::seconds(11));
        healthy.store(true, std::sync::atomic::Ordering::SeqCst);

        let mut c3 = Context::new(
            Request::new("GET", "/flaky", TriggerSource::HttpV1),
            manual.clone() as crate::clock::SharedClock,
            Arc::new(NoopMetrics),
        );
        assert!(invoke(&cb, &handler, &mut c3).await.is_ok());

        let mut c4 = Context::new(
            Request::new("GET", "/flaky", TriggerSource::HttpV1),
            manual.clone() as crate::clock::SharedClock,
            Arc::new(NoopMetrics),
        );
        assert!(invoke(&cb, &handler, &mut c4).await.is_ok());
    }

    #[tokio::test]
    async fn custom_classifier_overrides_default_status_range() {
        struct Always201;
        #[async_trait::async_trait]
        impl crate::handler::Handler for Always201 {
            async fn call(&self, ctx: &mut Context) -> Result<()> {
                ctx.response = Response::with_status(201);
                ctx.response.set_header("X-App-Error", "true");
                Ok(())
            }
        }

        let mut config = CircuitBreakerConfig::default();
        config.failure_threshold = 1;
        let cb = CircuitBreaker::new("svc", config)
            .with_failure_classifier(|ctx| ctx.response.headers().get("X-App-Error").is_some());
        let handler = Always201;

        let mut c = ctx();
        assert!(invoke(&cb, &handler, &mut c).await.is_ok());

        let mut c2 = ctx();
        let err = invoke(&cb, &handler, &mut c2).await.unwrap_err();
        assert!(matches!(err, Error::CircuitOpen(_)));
    }
}
