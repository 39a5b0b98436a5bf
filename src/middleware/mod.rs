//! Middleware: cross-cutting behavior interposed around a handler (spec
//! §4.3-§4.13). Ordering of composition is the caller's responsibility (see
//! [`crate::handler::Chain`]); this module only provides the building
//! blocks.

pub mod auth;
pub mod bulkhead;
pub mod circuit_breaker;
pub mod idempotency;
pub mod load_shed;
pub mod observability;
pub mod rate_limit;
pub mod request_tracking;
pub mod retry;
pub mod security_headers;
pub mod timeout;

pub use auth::Auth;
pub use bulkhead::Bulkhead;
pub use circuit_breaker::CircuitBreaker;
pub use idempotency::Idempotency;
pub use load_shed::LoadShed;
pub use observability::Observability;
pub use rate_limit::RateLimit;
pub use request_tracking::RequestTracking;
pub use retry::Retry;
pub use security_headers::SecurityHeaders;
pub use timeout::Timeout;
