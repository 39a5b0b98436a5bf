//! Windowed rate limiting, built over the generic [`crate::store::KvStore`]
//! capability so it works against any injected backend (memory, Redis,
//! ...), with the full key hierarchy, override resolution, and fail-open
//! behavior a multi-tenant gateway needs.

use crate::config::RateLimitConfig;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::handler::{Middleware, Next};
use crate::store::{JsonKvStore, KvStore};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TokenBucketEntry {
    tokens: f64,
    last_refill: i64,
}

struct Decision {
    allowed: bool,
    limit: u64,
    remaining: u64,
    reset_secs: i64,
}

pub struct RateLimit {
    config: RateLimitConfig,
    store: Arc<dyn KvStore>,
}

impl RateLimit {
    pub fn new(config: RateLimitConfig, store: Arc<dyn KvStore>) -> Self {
        Self { config, store }
    }

    fn resolve_limit(&self, ctx: &Context) -> u64 {
        if let Some(o) = self.config.user_overrides.iter().find(|o| o.key == ctx.user_id) {
            return o.limit;
        }
        if let Some(o) = self.config.tenant_overrides.iter().find(|o| o.key == ctx.tenant_id) {
            return o.limit;
        }
        self.config.default_limit as u64
    }

    fn build_key(&self, ctx: &Context) -> String {
        let mut parts = vec![self.config.key_prefix.clone()];
        if !ctx.tenant_id.is_empty() {
            parts.push(format!("tenant:{}", ctx.tenant_id));
        }
        if !ctx.user_id.is_empty() {
            parts.push(format!("user:{}", ctx.user_id));
        } else if let Some(ip) = ctx.request.client_ip() {
            parts.push(format!("ip:{ip}"));
        }
        parts.push(format!("path:{}", ctx.request.path));
        parts.join(":")
    }

    async fn check(&self, ctx: &Context) -> Result<Decision> {
        let limit = self.resolve_limit(ctx);
        let key = self.build_key(ctx);
        let now = ctx.clock().now().timestamp();
        let window = self.config.window_secs as i64;
        let entry_ttl = Duration::from_secs(self.config.entry_ttl_secs);

        match self.config.strategy.as_str() {
            "token_bucket" => self.check_token_bucket(&key, limit, now, window, entry_ttl).await,
            "sliding" => self.check_sliding(&key, limit, now, window, entry_ttl).await,
            _ => self.check_fixed(&key, limit, now, window, entry_ttl).await,
        }
    }

    /// Counts the current fixed window via a single atomic increment: every
    /// request that reaches the store — allowed or denied — bumps the
    /// counter exactly once, so concurrent callers can never both observe
    /// `count = N` and both write `count = N+1`.
    async fn check_fixed(
        &self,
        key: &str,
        limit: u64,
        now: i64,
        window: i64,
        entry_ttl: Duration,
    ) -> Result<Decision> {
        let window_start = now - now.rem_euclid(window);
        let windowed_key = format!("{key}:fixed:{window_start}");
        let reset_secs = (window_start + window - now).max(0);

        let count = self.store.incr(&windowed_key, 1, entry_ttl).await?;
        let count = count.max(0) as u64;

        if count > limit {
            return Ok(Decision {
                allowed: false,
                limit,
                remaining: 0,
                reset_secs,
            });
        }

        Ok(Decision {
            allowed: true,
            limit,
            remaining: limit - count,
            reset_secs,
        })
    }

    /// Approximates a sliding window via weighted counts of the current and
    /// previous fixed sub-windows. Both counts come from `incr`, so there is
    /// no read-then-write gap for concurrent callers to race through; the
    /// previous window's key is simply the current window's key shifted back
    /// by `window`, so no separate copy step is needed to "roll" it forward.
    async fn check_sliding(
        &self,
        key: &str,
        limit: u64,
        now: i64,
        window: i64,
        entry_ttl: Duration,
    ) -> Result<Decision> {
        let window_start = now - now.rem_euclid(window);
        let prev_start = window_start - window;
        let curr_key = format!("{key}:sliding:{window_start}");
        let prev_key = format!("{key}:sliding:{prev_start}");

        // The current sub-window must outlive the next window's "previous"
        // lookup, so it needs at least two window-lengths of TTL.
        let curr_ttl = entry_ttl.max(Duration::from_secs(window.max(0) as u64 * 2));
        let count = self.store.incr(&curr_key, 1, curr_ttl).await?;
        let prev_count = self.store.get_json::<i64>(&prev_key).await?.unwrap_or(0).max(0) as f64;

        let elapsed_fraction = (now - window_start) as f64 / window as f64;
        let weighted = prev_count * (1.0 - elapsed_fraction) + count.max(0) as f64;

        let reset_secs = (window_start + window - now).max(0);

        if weighted.round() as u64 > limit {
            return Ok(Decision {
                allowed: false,
                limit,
                remaining: 0,
                reset_secs,
            });
        }

        let remaining = limit.saturating_sub(weighted.round() as u64);
        Ok(Decision {
            allowed: true,
            limit,
            remaining,
            reset_secs,
        })
    }

    /// Token bucket state is a float pair that can't be updated with a plain
    /// increment, so this reads the bucket and writes it back through
    /// `compare_and_swap`: a lost race is detected (the CAS fails) and
    /// retried against freshly-read state rather than silently overwriting a
    /// concurrent update.
    async fn check_token_bucket(
        &self,
        key: &str,
        limit: u64,
        now: i64,
        window: i64,
        entry_ttl: Duration,
    ) -> Result<Decision> {
        const MAX_CAS_ATTEMPTS: u32 = 8;
        let refill_rate = limit as f64 / window.max(1) as f64; // tokens per second

        for _ in 0..MAX_CAS_ATTEMPTS {
            let existing = self.store.get(key).await?;
            let bucket = match &existing {
                Some(bytes) => {
                    serde_json::from_slice::<TokenBucketEntry>(bytes).map_err(|e| Error::Store(e.to_string()))?
                }
                None => TokenBucketEntry {
                    tokens: limit as f64,
                    last_refill: now,
                },
            };

            let elapsed = (now - bucket.last_refill).max(0) as f64;
            let mut tokens = (bucket.tokens + elapsed * refill_rate).min(limit as f64);

            let reset_secs = if refill_rate > 0.0 {
                ((1.0 - tokens.fract().max(0.0)) / refill_rate).ceil() as i64
            } else {
                window
            };

            let allowed = tokens >= 1.0;
            if allowed {
                tokens -= 1.0;
            }
            let updated = TokenBucketEntry {
                tokens,
                last_refill: now,
            };
            let new_bytes = serde_json::to_vec(&updated).map_err(|e| Error::Store(e.to_string()))?;

            if self.store.compare_and_swap(key, existing, new_bytes, entry_ttl).await? {
                return Ok(Decision {
                    allowed,
                    limit,
                    remaining: if allowed { updated.tokens.floor().max(0.0) as u64 } else { 0 },
                    reset_secs,
                });
            }
            // Lost the race to a concurrent updater; re-read and retry.
        }

        // Exhausted retries under heavy contention; fail open rather than
        // stall the request indefinitely.
        tracing::warn!(key, "token bucket CAS retries exhausted, failing open");
        Ok(Decision {
            allowed: true,
            limit,
            remaining: 0,
            reset_secs: window,
        })
    }
}

#[async_trait]
impl Middleware for RateLimit {
    async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<()> {
        if !self.config.enabled {
            return next.run(ctx).await;
        }

        match self.check(ctx).await {
            Ok(decision) => {
                ctx.response.set_header("X-RateLimit-Limit", decision.limit.to_string());
                ctx.response
                    .set_header("X-RateLimit-Remaining", decision.remaining.to_string());
                ctx.response
                    .set_header("X-RateLimit-Reset", decision.reset_secs.to_string());

                if !decision.allowed {
                    ctx.response.set_header("Retry-After", decision.reset_secs.to_string());
                    return Err(Error::RateLimitExceeded);
                }
                next.run(ctx).await
            }
            Err(e) => {
                tracing::warn!(error = %e, "rate limit store unavailable, failing open");
                next.run(ctx).await
            }
        }
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
    use crate::store::MemoryKvStore;

    struct Ok200;
    #[async_trait]
    impl Handler for Ok200 {
        async fn call(&self, ctx: &mut Context) -> Result<()> {
            ctx.response = Response::with_status(200);
            Ok(())
        }
    }

    fn ctx_for(tenant: &str, user: &str) -> Context {
        let mut c = Context::new(
            Request::new("GET", "/api/test", TriggerSource::HttpV1),
            system(),
            Arc::new(NoopMetrics),
        );
        c.tenant_id = tenant.into();
        c.user_id = user.into();
        c
    }

    async fn invoke(rate_limit: &RateLimit, ctx: &mut Context) -> Result<()> {
        let handler = Ok200;
        let recover: Arc<dyn Middleware> = Arc::new(Recover);
        let chain = [recover];
        let next = Next::new(&chain, &handler);
        rate_limit.handle(ctx, next).await
    }

    #[tokio::test]
    async fn allows_up_to_limit_then_denies() {
        let mut config = RateLimitConfig::default();
        config.default_limit = 2;
        config.window_secs = 60;
        let store = Arc::new(MemoryKvStore::new(system()));
        let rate_limit = RateLimit::new(config, store);

        let mut ctx = ctx_for("t1", "u1");
        assert!(invoke(&rate_limit, &mut ctx).await.is_ok());
        let mut ctx = ctx_for("t1", "u1");
        assert!(invoke(&rate_limit, &mut ctx).await.is_ok());
        let mut ctx = ctx_for("t1", "u1");
        let err = invoke(&rate_limit, &mut ctx).await.unwrap_err();
        assert!(matches!(err, Error::RateLimitExceeded));
        assert_eq!(ctx.response.headers().get("X-RateLimit-Remaining"), Some("0"));
        assert!(ctx.response.headers().get("Retry-After").is_some());
    }

    #[tokio::test]
    async fn different_tenants_have_independent_limits() {
        let mut config = RateLimitConfig::default();
        config.default_limit = 1;
        let store = Arc::new(MemoryKvStore::new(system()));
        let rate_limit = RateLimit::new(config, store);

        let mut ctx_a = ctx_for("t1", "u1");
        assert!(invoke(&rate_limit, &mut ctx_a).await.is_ok());
        let mut ctx_b = ctx_for("t2", "u1");
        assert!(invoke(&rate_limit, &mut ctx_b).await.is_ok());
    }

    #[tokio::test]
    async fn user_override_takes_precedence_over_default() {
        let mut config = RateLimitConfig::default();
        config.default_limit = 1;
        config.user_overrides = vec![crate::config::RateLimitOverride {
            key: "vip".into(),
            limit: 5,
        }];
        let store = Arc::new(MemoryKvStore::new(system()));
        let rate_limit = RateLimit::new(config, store);

        for _ in 0..5 {
            let mut ctx = ctx_for("t1", "vip");
            assert!(invoke(&rate_limit, &mut ctx).await.is_ok());
        }
    }
}
