//! Structured log enrichment and request metrics: emits counters/gauges/
//! histograms through the [`crate::observability::MetricsCollector`] seam,
//! implemented as a plain [`Middleware`] instead of a tower layer.

use crate::config::ObservabilityConfig;
use crate::context::Context;
use crate::error::Result;
use crate::handler::{Middleware, Next};
use async_trait::async_trait;
use std::time::Instant;

const TRUNCATION_MARKER: &str = "...[truncated]";

pub struct Observability {
    config: ObservabilityConfig,
}

impl Observability {
    pub fn new(config: ObservabilityConfig) -> Self {
        Self { config }
    }

    fn body_for_log(&self, body: &[u8]) -> Option<String> {
        if !self.config.log_request_body || self.config.sanitize {
            return None;
        }
        let text = String::from_utf8_lossy(body);
        if text.len() > self.config.max_body_log_size {
            // Truncate at the last char boundary at or before the limit so a
            // multi-byte character straddling the cutoff can't panic a slice.
            let cut = text
                .char_indices()
                .map(|(i, _)| i)
                .take_while(|&i| i <= self.config.max_body_log_size)
                .last()
                .unwrap_or(0);
            Some(format!("{}{TRUNCATION_MARKER}", &text[..cut]))
        } else {
            Some(text.into_owned())
        }
    }
}

#[async_trait]
impl Middleware for Observability {
    async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<()> {
        if !self.config.enabled {
            return next.run(ctx).await;
        }

        let span = tracing::info_span!(
            "request",
            request_id = %ctx.request_id.as_str(),
            tenant_id = %ctx.tenant_id,
            user_id = %ctx.user_id,
            trace_id = %ctx.request.header("X-Amzn-Trace-Id").unwrap_or(""),
        );
        let _entered = span.enter();

        let body_log = self.body_for_log(&ctx.request.body);
        tracing::info!(method = %ctx.request.method, path = %ctx.request.path, body = ?body_log, "request started");

        ctx.metrics().set_gauge("requests.active", 1.0, &[]);
        let started = Instant::now();

        let result = next.run(ctx).await;

        ctx.metrics().set_gauge("requests.active", -1.0, &[]);
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        let status = ctx.response.status().to_string();

        let tags: [(&str, &str); 3] = [
            ("method", ctx.request.method.as_str()),
            ("path", ctx.request.path.as_str()),
            ("status", status.as_str()),
        ];
        ctx.metrics().incr_counter("requests.total", 1, &tags);
        ctx.metrics().observe_histogram("requests.duration", duration_ms, &tags);

        match &result {
            Ok(()) => {
                tracing::info!(status = %status, duration_ms, "request completed");
            }
            Err(err) => {
                let error_type = error_type_name(err);
                tracing::error!(error_type, duration_ms, "request failed");
            }
        }

        result
    }
}

fn error_type_name(err: &crate::error::Error) -> &'static str {
    use crate::error::Error;
    match err {
        Error::Config(_) => "Config",
        Error::UnsupportedEvent(_) => "UnsupportedEvent",
        Error::RouteNotFound { .. } => "RouteNotFound",
        Error::WebSocketRouteNotFound { .. } => "WebSocketRouteNotFound",
        Error::AmbiguousRoute(_) => "AmbiguousRoute",
        Error::Unauthorized(_) => "Unauthorized",
        Error::Forbidden(_) => "Forbidden",
        Error::Validation(_) => "Validation",
        Error::IdempotencyConflict(_) => "IdempotencyConflict",
        Error::RateLimitExceeded => "RateLimitExceeded",
        Error::CircuitOpen(_) => "CircuitOpen",
        Error::BulkheadExceeded(_) => "BulkheadExceeded",
        Error::LoadShed => "LoadShed",
        Error::Timeout(_) => "Timeout",
        Error::Store(_) => "Store",
        Error::Panic(_) => "Panic",
        Error::Internal(_) => "Internal",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::system;
    use crate::handler::{Handler, Recover};
    use crate::observability::RecordingMetrics;
    use crate::request::{Request, TriggerSource};
    use crate::response::Response;
    use std::sync::Arc;

    struct Ok200;
    #[async_trait]
    impl Handler for Ok200 {
        async fn call(&self, ctx: &mut Context) -> Result<()> {
            ctx.response = Response::with_status(200);
            Ok(())
        }
    }

    #[tokio::test]
    async fn emits_requests_total_counter() {
        let metrics = Arc::new(RecordingMetrics::default());
        let mut ctx = Context::new(
            Request::new("GET", "/hello", TriggerSource::HttpV1),
            system(),
            metrics.clone(),
        );
        let observability = Observability::new(ObservabilityConfig::default());
        let handler = Ok200;
        let recover: Arc<dyn Middleware> = Arc::new(Recover);
        let chain = [recover];
        let next = Next::new(&chain, &handler);

        observability.handle(&mut ctx, next).await.unwrap();
        assert_eq!(metrics.requests_total(), 1);
    }

    #[test]
    fn body_log_respects_sanitize_flag() {
        let mut config = ObservabilityConfig::default();
        config.log_request_body = true;
        config.sanitize = true;
        let observability = Observability::new(config);
        assert_eq!(observability.body_for_log(b"secret payload"), None);
    }

    #[test]
    fn body_log_truncates_past_max_size() {
        let mut config = ObservabilityConfig::default();
        config.log_request_body = true;
        config.sanitize = false;
        config.max_body_log_size = 5;
        let observability = Observability::new(config);
        let logged = observability.body_for_log(b"hello world").unwrap();
        assert!(logged.starts_with("hello"));
        assert!(logged.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn body_log_truncation_never_splits_a_multibyte_char() {
        let mut config = ObservabilityConfig::default();
        config.log_request_body = true;
        config.sanitize = false;
        // "a😀b" is 'a' (1 byte) + U+1F600 (4 bytes) + 'b' (1 byte); cutting
        // at byte 3 would land in the middle of the emoji's UTF-8 encoding.
        let body = "a\u{1F600}b".as_bytes();
        config.max_body_log_size = 3;
        let observability = Observability::new(config);
        let logged = observability.body_for_log(body).unwrap();
        assert!(logged.is_char_boundary(logged.len() - TRUNCATION_MARKER.len()));
        assert!(logged.starts_with('a'));
    }
}
