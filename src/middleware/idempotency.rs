//! Capture/replay idempotency: response buffering via
//! `crate::response::Response`'s capture support, with key/value state
//! driven through the injected [`crate::store::KvStore`] instead of an
//! in-process map so the guarantee holds across concurrent invocations on
//! different workers.

use crate::config::IdempotencyConfig;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::handler::{Middleware, Next};
use crate::headers::HeaderMap;
use crate::store::{JsonKvStore, KvStore};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum IdempotencyStatus {
    Processing,
    Completed,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IdempotencyRecord {
    status: IdempotencyStatus,
    response_body: Value,
    status_code: u16,
    #[serde(default)]
    headers: HeaderMap,
    error_code: Option<String>,
    error_message: Option<String>,
    created_at: i64,
    expires_at: i64,
}

pub struct Idempotency {
    config: IdempotencyConfig,
    store: Arc<dyn KvStore>,
}

impl Idempotency {
    pub fn new(config: IdempotencyConfig, store: Arc<dyn KvStore>) -> Self {
        Self { config, store }
    }

    fn key_for(&self, ctx: &Context, header_value: &str) -> String {
        match ctx.principal.as_ref().and_then(|p| p.account_id.as_ref()) {
            Some(account_id) => format!("{account_id}:{header_value}"),
            None => header_value.to_string(),
        }
    }

    fn replay(ctx: &mut Context, record: &IdempotencyRecord) {
        match record.status {
            IdempotencyStatus::Completed => {
                ctx.response.set_headers(record.headers.clone());
                ctx.response.overwrite(record.status_code, record.response_body.clone());
            }
            IdempotencyStatus::Error => {
                ctx.response.set_headers(record.headers.clone());
                ctx.response.overwrite(
                    record.status_code,
                    serde_json::json!({
                        "code": record.error_code.clone().unwrap_or_else(|| "INTERNAL_ERROR".into()),
                        "message": record.error_message.clone().unwrap_or_default(),
                    }),
                );
            }
            IdempotencyStatus::Processing => unreachable!("processing records are never replayed"),
        }
        ctx.response.set_header("X-Idempotent-Replay", "true");
    }
}

#[async_trait]
impl Middleware for Idempotency {
    async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<()> {
        if !self.config.enabled {
            return next.run(ctx).await;
        }

        let header_value = match ctx.request.header(&self.config.header) {
            Some(v) => v.to_string(),
            None => return next.run(ctx).await,
        };
        let key = self.key_for(ctx, &header_value);
        let now = ctx.clock().now().timestamp();

        match self.store.get_json::<IdempotencyRecord>(&key).await {
            Ok(Some(record)) => match record.status {
                IdempotencyStatus::Completed | IdempotencyStatus::Error => {
                    Self::replay(ctx, &record);
                    return Ok(());
                }
                IdempotencyStatus::Processing => {
                    if now < record.expires_at {
                        return Err(Error::IdempotencyConflict(key));
                    }
                    let _ = self.store.delete(&key).await;
                }
            },
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, "idempotency store unavailable on lookup, continuing");
            }
        }

        let processing = IdempotencyRecord {
            status: IdempotencyStatus::Processing,
            response_body: Value::Null,
            status_code: 0,
            headers: HeaderMap::new(),
            error_code: None,
            error_message: None,
            created_at: now,
            expires_at: now + self.config.processing_timeout_secs as i64,
        };
        let processing_ttl = Duration::from_secs(self.config.processing_timeout_secs);

        match self.store.conditional_put_json(&key, &processing, processing_ttl).await {
            Ok(true) => {}
            Ok(false) => {
                if let Ok(Some(existing)) = self.store.get_json::<IdempotencyRecord>(&key).await {
                    match existing.status {
                        IdempotencyStatus::Completed | IdempotencyStatus::Error => {
                            Self::replay(ctx, &existing);
                            return Ok(());
                        }
                        IdempotencyStatus::Processing => return Err(Error::IdempotencyConflict(key)),
                    }
                }
                return Err(Error::IdempotencyConflict(key));
            }
            Err(e) => {
                tracing::warn!(error = %e, "idempotency store unavailable writing processing marker, continuing");
            }
        }

        ctx.response.enable_buffering();
        let result = next.run(ctx).await;

        let (status, body, headers) = match ctx.response.captured() {
            Some(captured) => (captured.status, captured.body.clone(), captured.headers.clone()),
            None => (ctx.response.status(), ctx.response.body().clone(), ctx.response.headers().clone()),
        };
        let ttl = Duration::from_secs(self.config.ttl_secs);

        match &result {
            Ok(()) => {
                let completed = IdempotencyRecord {
                    status: IdempotencyStatus::Completed,
                    response_body: body,
                    status_code: status,
                    headers,
                    error_code: None,
                    error_message: None,
                    created_at: now,
                    expires_at: now + self.config.ttl_secs as i64,
                };
                if let Err(e) = self.store.put_json(&key, &completed, ttl).await {
                    tracing::warn!(error = %e, "idempotency store unavailable recording completion");
                }
            }
            Err(err) => {
                let lift_err = err.clone().into_lift_error();
                let error_record = IdempotencyRecord {
                    status: IdempotencyStatus::Error,
                    response_body: Value::Null,
                    status_code: lift_err.status,
                    headers: HeaderMap::new(),
                    error_code: Some(lift_err.code.to_string()),
                    error_message: Some(lift_err.message),
                    created_at: now,
                    expires_at: now + self.config.ttl_secs as i64,
                };
                if let Err(e) = self.store.put_json(&key, &error_record, ttl).await {
                    tracing::warn!(error = %e, "idempotency store unavailable recording error");
                }
            }
        }

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
    use crate::store::MemoryKvStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler(Arc<AtomicUsize>);
    #[async_trait]
    impl Handler for CountingHandler {
        async fn call(&self, ctx: &mut Context) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            ctx.response.set_status(200);
            ctx.response.set_header("Content-Type", "application/json");
            ctx.response.set_header("X-Custom", "widget");
            ctx.response.write(serde_json::json!({"amount": 100}));
            Ok(())
        }
    }

    struct SlowCountingHandler(Arc<AtomicUsize>, Duration);
    #[async_trait]
    impl Handler for SlowCountingHandler {
        async fn call(&self, ctx: &mut Context) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.1).await;
            ctx.response.set_status(200);
            ctx.response.write(serde_json::json!({"amount": 100}));
            Ok(())
        }
    }

    fn ctx_with_key(key: &str) -> Context {
        let mut c = Context::new(
            Request::new("POST", "/payment", TriggerSource::HttpV1),
            system(),
            Arc::new(NoopMetrics),
        );
        c.request.headers.set("Idempotency-Key", key);
        c
    }

    async fn invoke(mw: &Idempotency, handler: &dyn Handler, ctx: &mut Context) -> Result<()> {
        let recover: Arc<dyn Middleware> = Arc::new(Recover);
        let chain = [recover];
        let next = Next::new(&chain, handler);
        mw.handle(ctx, next).await
    }

    #[tokio::test]
    async fn second_request_replays_first_response_and_skips_handler() {
        let store = Arc::new(MemoryKvStore::new(system()));
        let mw = Idempotency::new(IdempotencyConfig::default(), store);
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = CountingHandler(calls.clone());

        let mut ctx1 = ctx_with_key("pay-1");
        invoke(&mw, &handler, &mut ctx1).await.unwrap();

        let mut ctx2 = ctx_with_key("pay-1");
        invoke(&mw, &handler, &mut ctx2).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(ctx2.response.body(), &serde_json::json!({"amount": 100}));
        assert_eq!(ctx2.response.headers().get("X-Idempotent-Replay"), Some("true"));
        assert_eq!(ctx2.response.headers().get("Content-Type"), Some("application/json"));
        assert_eq!(ctx2.response.headers().get("X-Custom"), Some("widget"));
    }

    #[tokio::test]
    async fn missing_header_bypasses_idempotency() {
        let store = Arc::new(MemoryKvStore::new(system()));
        let mw = Idempotency::new(IdempotencyConfig::default(), store);
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = CountingHandler(calls.clone());

        let mut ctx = Context::new(
            Request::new("POST", "/payment", TriggerSource::HttpV1),
            system(),
            Arc::new(NoopMetrics),
        );
        invoke(&mw, &handler, &mut ctx).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_processing_record_yields_conflict() {
        let store = Arc::new(MemoryKvStore::new(system()));
        let mw = Idempotency::new(IdempotencyConfig::default(), store.clone());

        let now = system().now().timestamp();
        let processing = IdempotencyRecord {
            status: IdempotencyStatus::Processing,
            response_body: Value::Null,
            status_code: 0,
            headers: HeaderMap::new(),
            error_code: None,
            error_message: None,
            created_at: now,
            expires_at: now + 30,
        };
        store
            .put_json("pay-2", &processing, Duration::from_secs(30))
            .await
            .unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let handler = CountingHandler(calls.clone());
        let mut ctx = ctx_with_key("pay-2");
        let err = invoke(&mw, &handler, &mut ctx).await.unwrap_err();
        assert!(matches!(err, Error::IdempotencyConflict(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_requests_with_same_key_run_the_handler_at_most_once() {
        let store = Arc::new(MemoryKvStore::new(system()));
        let mw = Arc::new(Idempotency::new(IdempotencyConfig::default(), store));
        let calls = Arc::new(AtomicUsize::new(0));
        let handler: Arc<dyn Handler> = Arc::new(SlowCountingHandler(calls.clone(), Duration::from_millis(40)));

        let mut tasks = Vec::new();
        for _ in 0..10 {
            let mw = mw.clone();
            let handler = handler.clone();
            tasks.push(tokio::spawn(async move {
                let mut ctx = ctx_with_key("concurrent-1");
                invoke(mw.as_ref(), handler.as_ref(), &mut ctx).await
            }));
        }

        let results: Vec<Result<()>> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        let succeeded = results.iter().filter(|r| r.is_ok()).count();
        let conflicted = results
            .iter()
            .filter(|r| matches!(r, Err(Error::IdempotencyConflict(_))))
            .count();

        assert_eq!(calls.load(Ordering::SeqCst), 1, "handler must run exactly once");
        assert_eq!(succeeded + conflicted, 10);
        assert!(succeeded >= 1);
    }
}
