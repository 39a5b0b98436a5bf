//! # lift
//!
//! Framework for building serverless request handlers behind a Lambda-style
//! dispatch loop. Heterogeneous trigger payloads (API Gateway HTTP v1/v2,
//! API Gateway WebSocket, SQS/SNS/S3 records, EventBridge/scheduled rules)
//! are normalized by an [`adapters::Adapter`] into a single [`Request`],
//! routed by [`router::Router`] to a user-registered [`handler::Handler`],
//! and wrapped in a configurable [`handler::Chain`] of [`middleware`]
//! providing observability, authentication, rate limiting, idempotency,
//! resilience, and security headers.
//!
//! Lift is explicitly not an HTTP server: there is no listener, no
//! connection loop, no `axum`/`tower` underneath it. The dispatch loop that
//! calls into the crate once per invocation belongs to the caller (the
//! Lambda runtime, a local test harness, whatever replays captured events).
//!
//! ## Example
//!
//! ```rust,no_run
//! use lift::prelude::*;
//!
//! struct Hello;
//!
//! #[async_trait::async_trait]
//! impl Handler for Hello {
//!     async fn call(&self, ctx: &mut Context) -> lift::error::Result<()> {
//!         ctx.response.write(serde_json::json!({ "message": "hello" }));
//!         Ok(())
//!     }
//! }
//!
//! # async fn run() -> lift::error::Result<()> {
//! let config = Config::load_for_service("hello-service")?;
//! let mut router = Router::new();
//! router.register("GET", "/hello", std::sync::Arc::new(Hello))?;
//!
//! let registry = AdapterRegistry::new();
//! let event = serde_json::json!({
//!     "httpMethod": "GET",
//!     "path": "/hello",
//!     "requestContext": { "identity": {} },
//! });
//! let request = registry.adapt(event)?;
//! let (handler, path_params) = router.matches(&request.method, &request.path)?;
//!
//! let clock = lift::clock::system();
//! let metrics = std::sync::Arc::new(lift::observability::NoopMetrics);
//! let mut ctx = Context::new(request, clock, metrics);
//! ctx.request.path_params = path_params;
//!
//! let chain = Chain::new()
//!     .append(std::sync::Arc::new(SecurityHeaders::new(config.security_headers.clone())));
//! chain.run(handler.as_ref(), &mut ctx).await?;
//! # Ok(())
//! # }
//! ```

pub mod adapters;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod handler;
pub mod headers;
pub mod ids;
pub mod middleware;
pub mod observability;
pub mod request;
pub mod response;
pub mod router;
pub mod store;
pub mod websocket;

pub mod prelude;
