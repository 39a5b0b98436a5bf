//! Typed-backoff retry: a `RetryConfig` shape (`max_attempts`/
//! `backoff_strategy`/`initial_delay_ms`/`multiplier`/`jitter_range`)
//! implemented as a plain middleware driving `next.run()` repeatedly rather
//! than wrapping a tower `Service`.

use crate::config::RetryConfig;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::handler::{Middleware, Next};
use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;

/// A caller-supplied delay strategy, consulted instead of the configured
/// fixed/linear/exponential backoff when set.
pub type RetryDelayFn = Box<dyn Fn(u32, &Error) -> Duration + Send + Sync>;
/// Fired just before sleeping ahead of a retry: `(attempt, error, delay)`.
pub type OnRetry = Box<dyn Fn(u32, &Error, Duration) + Send + Sync>;
/// Fired when retrying is abandoned: `(attempts_made, last_error)`.
pub type OnGiveUp = Box<dyn Fn(u32, &Error) + Send + Sync>;

pub struct Retry {
    config: RetryConfig,
    delay_fn: Option<RetryDelayFn>,
    on_retry: Option<OnRetry>,
    on_give_up: Option<OnGiveUp>,
}

impl Retry {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            delay_fn: None,
            on_retry: None,
            on_give_up: None,
        }
    }

    /// Overrides the fixed/linear/exponential backoff with a caller-supplied
    /// delay strategy.
    pub fn with_delay_fn(mut self, f: impl Fn(u32, &Error) -> Duration + Send + Sync + 'static) -> Self {
        self.delay_fn = Some(Box::new(f));
        self
    }

    /// Registers a callback fired on every retry, before the backoff sleep.
    pub fn with_on_retry(mut self, f: impl Fn(u32, &Error, Duration) + Send + Sync + 'static) -> Self {
        self.on_retry = Some(Box::new(f));
        self
    }

    /// Registers a callback fired once retrying is abandoned.
    pub fn with_on_give_up(mut self, f: impl Fn(u32, &Error) + Send + Sync + 'static) -> Self {
        self.on_give_up = Some(Box::new(f));
        self
    }

    fn delay_for(&self, attempt: u32, err: &Error) -> Duration {
        if let Some(delay_fn) = &self.delay_fn {
            return delay_fn(attempt, err);
        }

        let base_ms = self.config.initial_delay_ms as f64;
        let raw_ms = match self.config.backoff_strategy.as_str() {
            "linear" => base_ms * attempt as f64,
            "exponential" => base_ms * self.config.multiplier.powi(attempt as i32 - 1),
            _ => base_ms,
        };
        let clamped_ms = raw_ms.min(self.config.max_delay_ms as f64).max(0.0);

        let jittered_ms = if self.config.jitter_range > 0.0 {
            let jitter = clamped_ms * self.config.jitter_range;
            let offset = rand::rng().random_range(-jitter..=jitter);
            (clamped_ms + offset).max(0.0)
        } else {
            clamped_ms
        };

        Duration::from_millis(jittered_ms.round() as u64)
    }

    fn give_up(&self, attempt: u32, err: &Error) {
        tracing::warn!(attempts = attempt, error = %err, "retry giving up");
        if let Some(on_give_up) = &self.on_give_up {
            on_give_up(attempt, err);
        }
    }

    fn is_retryable(&self, err: &Error) -> bool {
        match err {
            Error::Timeout(_) => false,
            _ => {
                let lift_err = err.clone().into_lift_error();
                if self.config.non_retryable_status_codes.contains(&lift_err.status) {
                    false
                } else if self.config.retryable_status_codes.contains(&lift_err.status) {
                    true
                } else {
                    !lift_err.is_client_error()
                }
            }
        }
    }
}

#[async_trait]
impl Middleware for Retry {
    async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<()> {
        if !self.config.enabled {
            return next.run(ctx).await;
        }

        let total_deadline = self
            .config
            .total_timeout_ms
            .map(|ms| tokio::time::Instant::now() + Duration::from_millis(ms));

        let mut attempt = 1;
        loop {
            if ctx.is_cancelled() {
                return Err(Error::Internal("request cancelled".into()));
            }

            let result = match self.config.per_attempt_timeout_ms {
                Some(ms) => {
                    match tokio::time::timeout(Duration::from_millis(ms), next.run(ctx)).await {
                        Ok(r) => r,
                        Err(_) => Err(Error::Timeout(Duration::from_millis(ms))),
                    }
                }
                None => next.run(ctx).await,
            };

            match result {
                Ok(()) => return Ok(()),
                Err(err) => {
                    let give_up = attempt >= self.config.max_attempts || !self.is_retryable(&err);
                    if give_up {
                        self.give_up(attempt, &err);
                        return Err(err);
                    }

                    let delay = self.delay_for(attempt, &err);
                    if let Some(deadline) = total_deadline {
                        if tokio::time::Instant::now() + delay >= deadline {
                            self.give_up(attempt, &err);
                            return Err(err);
                        }
                    }

                    tracing::info!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying");
                    if let Some(on_retry) = &self.on_retry {
                        on_retry(attempt, &err, delay);
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = ctx.cancellation_token().cancelled() => {
                            return Err(Error::Internal("request cancelled".into()));
                        }
                    }
                    attempt += 1;
                }
            }
        }
    }
}
