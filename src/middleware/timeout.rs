//! Deadline resolution and enforcement: an optional dynamic calculator, else
//! per-tenant override, else per-operation override, else the configured
//! default, enforced with `tokio::time::timeout`. Uses the same
//! override-precedence idiom as `rate_limit.rs`.

use crate::config::TimeoutConfig;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::handler::{Middleware, Next};
use async_trait::async_trait;
use std::time::Duration;

/// An optional hook computing a timeout from request state, consulted before
/// any configured override.
pub type DynamicTimeout = Box<dyn Fn(&Context) -> Option<Duration> + Send + Sync>;

pub struct Timeout {
    config: TimeoutConfig,
    dynamic: Option<DynamicTimeout>,
}

impl Timeout {
    pub fn new(config: TimeoutConfig) -> Self {
        Self { config, dynamic: None }
    }

    pub fn with_dynamic(mut self, f: impl Fn(&Context) -> Option<Duration> + Send + Sync + 'static) -> Self {
        self.dynamic = Some(Box::new(f));
        self
    }

    fn resolve(&self, ctx: &Context) -> Duration {
        if let Some(dynamic) = &self.dynamic {
            if let Some(d) = dynamic(ctx) {
                return d;
            }
        }
        if let Some(o) = self.config.tenant_overrides.iter().find(|o| o.key == ctx.tenant_id) {
            return Duration::from_millis(o.limit as u64);
        }
        let operation = format!("{}:{}", ctx.request.method, ctx.request.path);
        if let Some(o) = self.config.operation_overrides.iter().find(|o| o.key == operation) {
            return Duration::from_millis(o.limit as u64);
        }
        Duration::from_millis(self.config.default_timeout_ms)
    }
}

#[async_trait]
impl Middleware for Timeout {
    async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<()> {
        if !self.config.enabled {
            return next.run(ctx).await;
        }

        let duration = self.resolve(ctx);
        let child = ctx.child_token();
        let parent = ctx.swap_cancellation(child.clone());

        let result = match tokio::time::timeout(duration, next.run(ctx)).await {
            Ok(result) => result,
            Err(_) => {
                child.cancel();
                Err(Error::Timeout(duration))
            }
        };
        ctx.swap_cancellation(parent);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::system;
    use crate::config::RateLimitOverride;
    use crate::handler::{Handler, Recover};
    use crate::observability::NoopMetrics;
    use crate::request::{Request, TriggerSource};
    use crate::response::Response;
    use std::sync::Arc;

    struct SlowHandler(Duration);
    #[async_trait]
    impl Handler for SlowHandler {
        async fn call(&self, ctx: &mut Context) -> Result<()> {
            tokio::time::sleep(self.0).await;
            ctx.response = Response::with_status(200);
            Ok(())
        }
    }

    struct TokenCapturingHandler {
        delay: Duration,
        captured: Arc<std::sync::Mutex<Option<tokio_util::sync::CancellationToken>>>,
    }
    #[async_trait]
    impl Handler for TokenCapturingHandler {
        async fn call(&self, ctx: &mut Context) -> Result<()> {
            *self.captured.lock().unwrap() = Some(ctx.cancellation_token());
            tokio::time::sleep(self.delay).await;
            ctx.response = Response::with_status(200);
            Ok(())
        }
    }

    async fn invoke(timeout: &Timeout, handler: &dyn Handler, ctx: &mut Context) -> Result<()> {
        let recover: Arc<dyn Middleware> = Arc::new(Recover);
        let chain = [recover];
        let next = Next::new(&chain, handler);
        timeout.handle(ctx, next).await
    }

    #[tokio::test]
    async fn slow_handler_past_default_returns_timeout_error() {
        let mut config = TimeoutConfig::default();
        config.default_timeout_ms = 10;
        let timeout = Timeout::new(config);
        let handler = SlowHandler(Duration::from_millis(100));

        let mut ctx = Context::new(
            Request::new("GET", "/slow", TriggerSource::HttpV1),
            system(),
            Arc::new(NoopMetrics),
        );
        let err = invoke(&timeout, &handler, &mut ctx).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[tokio::test]
    async fn timed_out_child_token_is_the_one_downstream_code_observes() {
        let mut config = TimeoutConfig::default();
        config.default_timeout_ms = 10;
        let timeout = Timeout::new(config);
        let captured = Arc::new(std::sync::Mutex::new(None));
        let handler = TokenCapturingHandler {
            delay: Duration::from_millis(100),
            captured: captured.clone(),
        };

        let mut ctx = Context::new(
            Request::new("GET", "/slow", TriggerSource::HttpV1),
            system(),
            Arc::new(NoopMetrics),
        );
        let parent_before = ctx.cancellation_token();
        let err = invoke(&timeout, &handler, &mut ctx).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));

        let observed = captured.lock().unwrap().take().expect("handler ran and captured a token");
        assert!(observed.is_cancelled(), "the token downstream code saw must be cancelled");
        assert!(!parent_before.is_cancelled(), "cancelling the child must not cancel the parent");
    }

    #[tokio::test]
    async fn tenant_override_takes_precedence_over_default() {
        let mut config = TimeoutConfig::default();
        config.default_timeout_ms = 10;
        config.tenant_overrides = vec![RateLimitOverride { key: "t1".into(), limit: 200 }];
        let timeout = Timeout::new(config);
        let handler = SlowHandler(Duration::from_millis(50));

        let mut ctx = Context::new(
            Request::new("GET", "/slow", TriggerSource::HttpV1),
            system(),
            Arc::new(NoopMetrics),
        );
        ctx.tenant_id = "t1".into();
        assert!(invoke(&timeout, &handler, &mut ctx).await.is_ok());
    }
}
