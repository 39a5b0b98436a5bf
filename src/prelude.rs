//! Convenient single-import surface for consumers wiring up a handler.

pub use crate::adapters::{Adapter, AdapterRegistry};
pub use crate::clock::{Clock, ManualClock, SharedClock};
pub use crate::config::{
    AuthConfig, BulkheadConfig, CircuitBreakerConfig, Config, IdempotencyConfig, LoadShedConfig,
    ObservabilityConfig, RateLimitConfig, RequestTrackingConfig, RetryConfig,
    SecurityHeadersConfig, TimeoutConfig,
};
pub use crate::context::Context;
pub use crate::error::{Error, Result};
pub use crate::handler::{handler_fn, Chain, ErrorHandler, FnHandler, Handler, Middleware, Next, Recover};
pub use crate::headers::HeaderMap;
pub use crate::ids::RequestId;
pub use crate::middleware::{
    Auth, Bulkhead, CircuitBreaker, Idempotency, LoadShed, Observability, RateLimit,
    RequestTracking, Retry, SecurityHeaders, Timeout,
};
pub use crate::observability::{MetricsCollector, NoopMetrics};
pub use crate::request::{Request, TriggerSource, WebSocketContext, WebSocketEventType};
pub use crate::response::Response;
pub use crate::router::Router;
pub use crate::store::{ConnectionRecord, ConnectionStore, JsonKvStore, KvStore, MemoryConnectionStore, MemoryKvStore};
pub use crate::websocket::{BroadcastTarget, Broadcaster, ConnectionPoster};

pub use async_trait::async_trait;
pub use serde_json::{json, Value};
