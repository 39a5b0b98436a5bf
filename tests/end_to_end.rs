//! End-to-end scenarios driving a full adapter -> router -> middleware chain
//! -> handler invocation, the way a Lambda dispatch loop would.

use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header as JwtHeader};
use lift::prelude::*;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct Hello;
#[async_trait]
impl Handler for Hello {
    async fn call(&self, ctx: &mut Context) -> lift::error::Result<()> {
        let name = ctx.request.query("name").unwrap_or("world");
        ctx.response.write(json!({ "message": format!("Hello, {name}!") }));
        Ok(())
    }
}

async fn dispatch(
    registry: &AdapterRegistry,
    router: &Router,
    chain: &Chain,
    event: serde_json::Value,
) -> Context {
    let request = registry.adapt(event).unwrap();
    let (handler, path_params) = router.matches(&request.method, &request.path).unwrap();
    let mut ctx = Context::new(request, lift::clock::system(), Arc::new(NoopMetrics));
    ctx.request.path_params = path_params;
    chain.run(handler.as_ref(), &mut ctx).await.unwrap();
    ctx
}

#[tokio::test]
async fn hello_world_get_with_query() {
    let mut router = Router::new();
    router.register("GET", "/hello", Arc::new(Hello)).unwrap();
    let registry = AdapterRegistry::new();
    let chain = Chain::new();

    let event = json!({
        "httpMethod": "GET",
        "path": "/hello",
        "queryStringParameters": { "name": "Ada" },
        "requestContext": { "identity": {} },
    });

    let ctx = dispatch(&registry, &router, &chain, event).await;
    assert_eq!(ctx.response.status(), 200);
    assert_eq!(ctx.response.body(), &json!({ "message": "Hello, Ada!" }));
}

struct Payment(Arc<AtomicUsize>);
#[async_trait]
impl Handler for Payment {
    async fn call(&self, ctx: &mut Context) -> lift::error::Result<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        ctx.response.write(json!({ "status": "charged", "amount": 100 }));
        Ok(())
    }
}

#[tokio::test]
async fn idempotent_payment_replays_first_response_without_rerunning_handler() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut router = Router::new();
    router.register("POST", "/payment", Arc::new(Payment(calls.clone()))).unwrap();
    let registry = AdapterRegistry::new();

    let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new(lift::clock::system()));
    let chain = Chain::new().append(Arc::new(Idempotency::new(IdempotencyConfig::default(), store)));

    let event = || {
        json!({
            "httpMethod": "POST",
            "path": "/payment",
            "body": json!({"amount": 100}).to_string(),
            "headers": { "Idempotency-Key": "pay-1" },
            "requestContext": { "identity": {} },
        })
    };

    let first = dispatch(&registry, &router, &chain, event()).await;
    let second = dispatch(&registry, &router, &chain, event()).await;

    assert_eq!(first.response.status(), 200);
    assert_eq!(second.response.status(), 200);
    assert_eq!(first.response.body(), second.response.body());
    assert_eq!(second.response.headers().get("X-Idempotent-Replay"), Some("true"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

struct SlowPayment(Arc<AtomicUsize>);
#[async_trait]
impl Handler for SlowPayment {
    async fn call(&self, ctx: &mut Context) -> lift::error::Result<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        ctx.response.write(json!({ "status": "charged", "amount": 100 }));
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_idempotent_payments_with_same_key_run_the_handler_at_most_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut router = Router::new();
    router.register("POST", "/payment", Arc::new(SlowPayment(calls.clone()))).unwrap();
    let registry = Arc::new(AdapterRegistry::new());

    let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new(lift::clock::system()));
    let chain = Arc::new(Chain::new().append(Arc::new(Idempotency::new(IdempotencyConfig::default(), store))));
    let router = Arc::new(router);

    let event = || {
        json!({
            "httpMethod": "POST",
            "path": "/payment",
            "body": json!({"amount": 100}).to_string(),
            "headers": { "Idempotency-Key": "pay-concurrent" },
            "requestContext": { "identity": {} },
        })
    };

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let registry = registry.clone();
        let router = router.clone();
        let chain = chain.clone();
        let event = event();
        tasks.push(tokio::spawn(async move {
            dispatch(&registry, &router, &chain, event).await
        }));
    }

    let results: Vec<Context> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    assert!(results.iter().all(|ctx| ctx.response.status() == 200));
    assert_eq!(calls.load(Ordering::SeqCst), 1, "handler must run at most once across concurrent callers");
}

struct Ok200;
#[async_trait]
impl Handler for Ok200 {
    async fn call(&self, ctx: &mut Context) -> lift::error::Result<()> {
        ctx.response.write(json!({ "ok": true }));
        Ok(())
    }
}

#[tokio::test]
async fn rate_limit_allows_two_then_rejects_third() {
    let mut router = Router::new();
    router.register("GET", "/api/test", Arc::new(Ok200)).unwrap();
    let registry = AdapterRegistry::new();

    let mut rl_config = RateLimitConfig::default();
    rl_config.default_limit = 2;
    rl_config.window_secs = 60;
    let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new(lift::clock::system()));
    let chain = Chain::new().append(Arc::new(RateLimit::new(rl_config, store)));

    let event = || {
        json!({
            "httpMethod": "GET",
            "path": "/api/test",
            "requestContext": { "identity": {} },
        })
    };

    let first = dispatch(&registry, &router, &chain, event()).await;
    let second = dispatch(&registry, &router, &chain, event()).await;
    let third = dispatch(&registry, &router, &chain, event()).await;

    assert_eq!(first.response.status(), 200);
    assert_eq!(second.response.status(), 200);
    assert_eq!(third.response.status(), 429);
    assert_eq!(third.response.headers().get("X-RateLimit-Remaining"), Some("0"));
    let retry_after: i64 = third.response.headers().get("Retry-After").unwrap().parse().unwrap();
    assert!((0..=60).contains(&retry_after));
}

#[tokio::test]
async fn circuit_breaker_trips_after_threshold_and_short_circuits_the_handler() {
    let calls = Arc::new(AtomicUsize::new(0));
    struct CountingFailure(Arc<AtomicUsize>);
    #[async_trait]
    impl Handler for CountingFailure {
        async fn call(&self, _ctx: &mut Context) -> lift::error::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(Error::Internal("downstream unavailable".into()))
        }
    }

    let mut router = Router::new();
    router.register("GET", "/flaky", Arc::new(CountingFailure(calls.clone()))).unwrap();
    let registry = AdapterRegistry::new();

    let mut cb_config = CircuitBreakerConfig::default();
    cb_config.failure_threshold = 3;
    let chain = Chain::new().append(Arc::new(CircuitBreaker::new("flaky-svc", cb_config)));

    let event = || {
        json!({
            "httpMethod": "GET",
            "path": "/flaky",
            "requestContext": { "identity": {} },
        })
    };

    let mut last = None;
    for _ in 0..3 {
        last = Some(dispatch(&registry, &router, &chain, event()).await);
    }
    let third = last.unwrap();
    assert_eq!(third.response.status(), 500);
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let fourth = dispatch(&registry, &router, &chain, event()).await;
    assert_eq!(fourth.response.status(), 503);
    let body = fourth.response.body().to_string();
    assert!(body.contains("CIRCUIT_BREAKER_OPEN"));
    assert_eq!(calls.load(Ordering::SeqCst), 3, "fourth call must not reach the handler");
}

struct FailTwiceThenSucceed(Arc<AtomicUsize>);
#[async_trait]
impl Handler for FailTwiceThenSucceed {
    async fn call(&self, ctx: &mut Context) -> lift::error::Result<()> {
        let attempt = self.0.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt < 3 {
            return Err(Error::Internal("temporarily unavailable".into()));
        }
        ctx.response.write(json!({ "ok": true }));
        Ok(())
    }
}

#[tokio::test]
async fn retry_recovers_after_two_failures() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut router = Router::new();
    router
        .register("GET", "/unstable", Arc::new(FailTwiceThenSucceed(calls.clone())))
        .unwrap();
    let registry = AdapterRegistry::new();

    let mut retry_config = RetryConfig::default();
    retry_config.max_attempts = 3;
    retry_config.backoff_strategy = "exponential".into();
    retry_config.initial_delay_ms = 1;
    retry_config.jitter_range = 0.0;
    let chain = Chain::new().append(Arc::new(Retry::new(retry_config)));

    let event = json!({
        "httpMethod": "GET",
        "path": "/unstable",
        "requestContext": { "identity": {} },
    });

    let started = std::time::Instant::now();
    let ctx = dispatch(&registry, &router, &chain, event).await;
    let elapsed = started.elapsed();

    assert_eq!(ctx.response.status(), 200);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(elapsed >= std::time::Duration::from_millis(3));
}

struct EchoUser;
#[async_trait]
impl Handler for EchoUser {
    async fn call(&self, ctx: &mut Context) -> lift::error::Result<()> {
        ctx.response.write(json!({
            "user_id": ctx.user_id,
            "token_query": ctx.request.query("Authorization"),
        }));
        Ok(())
    }
}

fn connect_event(authorization: Option<&str>) -> serde_json::Value {
    let mut query = serde_json::Map::new();
    if let Some(token) = authorization {
        query.insert("Authorization".to_string(), json!(token));
    }
    json!({
        "requestContext": {
            "connectionId": "conn-42",
            "eventType": "CONNECT",
            "routeKey": "$connect",
            "stage": "prod",
            "domainName": "abc.execute-api.us-east-1.amazonaws.com",
        },
        "queryStringParameters": serde_json::Value::Object(query),
    })
}

#[tokio::test]
async fn websocket_connect_authenticates_via_query_string_token() {
    let secret = b"integration-test-secret";
    let mut auth_config = AuthConfig::default();
    auth_config.token_lookup = "query:Authorization".into();
    auth_config.algorithm = "HS256".into();
    let auth = Auth::new(auth_config, secret).unwrap();

    #[derive(serde::Serialize)]
    struct Claims {
        sub: String,
        exp: i64,
    }
    let now = chrono::Utc::now().timestamp();
    let claims = Claims { sub: "user-7".into(), exp: now + 3600 };
    let token = encode(&JwtHeader::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(secret)).unwrap();

    let registry = AdapterRegistry::new();
    let mut router = Router::new();
    router.register_websocket("$connect", Arc::new(EchoUser)).unwrap();

    let request = registry.adapt(connect_event(Some(&token))).unwrap();
    let handler = router.match_websocket(&request.route_key).unwrap();
    let mut ctx = Context::new(request, lift::clock::system(), Arc::new(NoopMetrics));
    let chain = Chain::new().append(Arc::new(auth));
    chain.run(handler.as_ref(), &mut ctx).await.unwrap();

    assert_ne!(ctx.user_id, "");
    assert_eq!(ctx.response.status(), 200);
    assert_eq!(
        ctx.response.body(),
        &json!({ "user_id": "user-7", "token_query": token })
    );
}

#[tokio::test]
async fn websocket_connect_without_token_is_unauthorized() {
    let secret = b"integration-test-secret";
    let mut auth_config = AuthConfig::default();
    auth_config.token_lookup = "query:Authorization".into();
    auth_config.algorithm = "HS256".into();
    let auth = Auth::new(auth_config, secret).unwrap();

    let registry = AdapterRegistry::new();
    let mut router = Router::new();
    router.register_websocket("$connect", Arc::new(EchoUser)).unwrap();

    let request = registry.adapt(connect_event(None)).unwrap();
    let handler = router.match_websocket(&request.route_key).unwrap();
    let mut ctx = Context::new(request, lift::clock::system(), Arc::new(NoopMetrics));
    let chain = Chain::new().append(Arc::new(auth));
    chain.run(handler.as_ref(), &mut ctx).await.unwrap();

    assert_eq!(ctx.response.status(), 401);
}

struct SlowOk(Arc<AtomicUsize>);
#[async_trait]
impl Handler for SlowOk {
    async fn call(&self, ctx: &mut Context) -> lift::error::Result<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        ctx.response.write(json!({ "ok": true }));
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn bulkhead_rejects_exactly_one_of_capacity_plus_one_concurrent_requests() {
    const CAPACITY: usize = 3;
    let calls = Arc::new(AtomicUsize::new(0));
    let mut router = Router::new();
    router.register("GET", "/slow", Arc::new(SlowOk(calls.clone()))).unwrap();
    let registry = Arc::new(AdapterRegistry::new());
    let router = Arc::new(router);

    let mut bh_config = BulkheadConfig::default();
    bh_config.global_limit = CAPACITY;
    bh_config.max_wait_ms = 0;
    let chain = Arc::new(Chain::new().append(Arc::new(Bulkhead::new(bh_config))));

    let event = || {
        json!({
            "httpMethod": "GET",
            "path": "/slow",
            "requestContext": { "identity": {} },
        })
    };

    let mut tasks = Vec::new();
    for _ in 0..(CAPACITY + 1) {
        let registry = registry.clone();
        let router = router.clone();
        let chain = chain.clone();
        let event = event();
        tasks.push(tokio::spawn(async move {
            dispatch(&registry, &router, &chain, event).await
        }));
    }

    let results: Vec<Context> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let statuses: Vec<u16> = results.iter().map(|ctx| ctx.response.status()).collect();
    assert_eq!(statuses.iter().filter(|&&s| s == 200).count(), CAPACITY);
    assert_eq!(statuses.iter().filter(|&&s| s == 503).count(), 1);
}
