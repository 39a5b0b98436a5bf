//! Error taxonomy and sanitized client-facing responses.
//!
//! Internal errors carry full detail for logs; anything that crosses back
//! to the caller is a [`LiftError`] — a status, a machine-readable code, and
//! a message safe to show externally. Conversion from [`Error`] to
//! [`LiftError`] is where sanitization happens: stack traces, store
//! identifiers, and secret material never leave this module.

use serde::Serialize;
use thiserror::Error;

/// A response-shaped error: what a client or the dispatch loop actually sees.
///
/// This is the "distinguished error variant" the handler chain recognizes:
/// any middleware may return one to short-circuit to a terminal response.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LiftError {
    pub code: &'static str,
    pub message: String,
    pub status: u16,
}

impl LiftError {
    pub fn new(status: u16, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }

    /// Whether spec's default retry policy treats this status as retryable.
    pub fn is_retryable_status(&self) -> bool {
        matches!(self.status, 429 | 500 | 502 | 503 | 504)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(404, "NOT_FOUND", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(401, "UNAUTHORIZED", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(403, "FORBIDDEN", message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(422, "VALIDATION_FAILED", message)
    }

    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(409, code, message)
    }

    pub fn too_many_requests(message: impl Into<String>) -> Self {
        Self::new(429, "TOO_MANY_REQUESTS", message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(408, "TIMEOUT", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(500, "INTERNAL_ERROR", message)
    }

    pub fn circuit_open() -> Self {
        Self::new(503, "CIRCUIT_BREAKER_OPEN", "the circuit breaker is open")
    }

    pub fn bulkhead_exceeded() -> Self {
        Self::new(
            503,
            "BULKHEAD_LIMIT_EXCEEDED",
            "too many concurrent requests for this resource",
        )
    }

    pub fn load_shed() -> Self {
        Self::new(503, "LOAD_SHED", "the server is shedding load")
    }

    pub fn panic_recovered() -> Self {
        Self::new(500, "PANIC_RECOVERED", "an internal error occurred")
    }
}

impl std::fmt::Display for LiftError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.code, self.status, self.message)
    }
}

impl std::error::Error for LiftError {}

/// Internal crate error type. Every fallible operation in Lift returns this;
/// middleware at the edge of the chain converts it to a [`LiftError`] via
/// [`Error::into_lift_error`], logging the untruncated detail first.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("unsupported event payload: {0}")]
    UnsupportedEvent(String),

    #[error("no route matched {method} {path}")]
    RouteNotFound { method: String, path: String },

    #[error("no websocket route matched route key {route_key}")]
    WebSocketRouteNotFound { route_key: String },

    #[error("ambiguous route registration: {0}")]
    AmbiguousRoute(String),

    #[error("authentication failed: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("idempotency conflict for key {0}")]
    IdempotencyConflict(String),

    #[error("rate limit exceeded")]
    RateLimitExceeded,

    #[error("circuit breaker open for key {0}")]
    CircuitOpen(String),

    #[error("bulkhead limit exceeded for key {0}")]
    BulkheadExceeded(String),

    #[error("load shed")]
    LoadShed,

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("store error: {0}")]
    Store(String),

    #[error("handler panicked: {0}")]
    Panic(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Converts to the sanitized, client-facing shape. Call sites should log
    /// `self` (via its `Display`/`Debug`, with the request-id in scope)
    /// before discarding it in favor of the returned [`LiftError`].
    pub fn into_lift_error(self) -> LiftError {
        match self {
            Error::Config(msg) => LiftError::internal(format!("configuration error: {msg}")),
            Error::UnsupportedEvent(_) => {
                LiftError::new(400, "UNSUPPORTED_EVENT", "unrecognized event payload")
            }
            Error::RouteNotFound { .. } | Error::WebSocketRouteNotFound { .. } => {
                LiftError::not_found("no route matches this request")
            }
            Error::AmbiguousRoute(msg) => LiftError::internal(msg),
            Error::Unauthorized(_) => LiftError::unauthorized("authentication required"),
            Error::Forbidden(_) => LiftError::forbidden("access denied"),
            Error::Validation(msg) => LiftError::validation(msg),
            Error::IdempotencyConflict(_) => {
                LiftError::conflict("IDEMPOTENCY_CONFLICT", "request already in progress")
            }
            Error::RateLimitExceeded => LiftError::too_many_requests("rate limit exceeded"),
            Error::CircuitOpen(_) => LiftError::circuit_open(),
            Error::BulkheadExceeded(_) => LiftError::bulkhead_exceeded(),
            Error::LoadShed => LiftError::load_shed(),
            Error::Timeout(_) => LiftError::timeout("the request timed out"),
            Error::Store(_) => LiftError::internal("a dependency is temporarily unavailable"),
            Error::Panic(_) => LiftError::panic_recovered(),
            Error::Internal(_) => LiftError::internal("an internal error occurred"),
        }
    }
}

impl From<LiftError> for Error {
    fn from(e: LiftError) -> Self {
        match e.code {
            "UNAUTHORIZED" => Error::Unauthorized(e.message),
            "FORBIDDEN" => Error::Forbidden(e.message),
            "VALIDATION_FAILED" => Error::Validation(e.message),
            "IDEMPOTENCY_CONFLICT" => Error::IdempotencyConflict(e.message),
            "TOO_MANY_REQUESTS" => Error::RateLimitExceeded,
            "CIRCUIT_BREAKER_OPEN" => Error::CircuitOpen(e.message),
            "BULKHEAD_LIMIT_EXCEEDED" => Error::BulkheadExceeded(e.message),
            "LOAD_SHED" => Error::LoadShed,
            "TIMEOUT" => Error::Timeout(std::time::Duration::default()),
            "PANIC_RECOVERED" => Error::Panic(e.message),
            "NOT_FOUND" => Error::RouteNotFound {
                method: String::new(),
                path: e.message,
            },
            _ => Error::Internal(e.message),
        }
    }
}

impl From<figment::Error> for Error {
    fn from(e: figment::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for Error {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        Error::Unauthorized(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_vs_server_classification() {
        assert!(LiftError::not_found("x").is_client_error());
        assert!(LiftError::internal("x").is_server_error());
    }

    #[test]
    fn retryable_statuses_match_spec_defaults() {
        for status in [429, 500, 502, 503, 504] {
            let err = LiftError::new(status, "X", "x");
            assert!(err.is_retryable_status(), "{status} should be retryable");
        }
        for status in [400, 401, 403, 404, 422] {
            let err = LiftError::new(status, "X", "x");
            assert!(!err.is_retryable_status(), "{status} should not be retryable");
        }
    }

    #[test]
    fn circuit_breaker_errors_are_503_with_documented_code() {
        let err = Error::CircuitOpen("svc:tenant".into()).into_lift_error();
        assert_eq!(err.status, 503);
        assert_eq!(err.code, "CIRCUIT_BREAKER_OPEN");
    }

    #[test]
    fn idempotency_conflict_is_409() {
        let err = Error::IdempotencyConflict("pay-1".into()).into_lift_error();
        assert_eq!(err.status, 409);
        assert_eq!(err.code, "IDEMPOTENCY_CONFLICT");
    }

    #[test]
    fn internal_errors_do_not_leak_detail() {
        let err = Error::Store("postgres://user:pw@host/db unreachable".into()).into_lift_error();
        assert!(!err.message.contains("postgres"));
        assert!(!err.message.contains("pw"));
    }

    #[test]
    fn panic_is_sanitized_to_500() {
        let err = Error::Panic("index out of bounds: the len is 3 but the index is 7".into())
            .into_lift_error();
        assert_eq!(err.status, 500);
        assert_eq!(err.code, "PANIC_RECOVERED");
        assert!(!err.message.contains("index out of bounds"));
    }
}
