//! Request-ID injection and sensitive-header masking for logs.
//!
//! Adapted from this file's `PROPAGATE_HEADERS`/`SENSITIVE_HEADERS` idiom,
//! reimplemented as a plain [`Middleware`] since Lift has no `tower_http`
//! layer stack to hang this off of.

use crate::config::RequestTrackingConfig;
use crate::context::Context;
use crate::error::Result;
use crate::handler::{Middleware, Next};
use async_trait::async_trait;

/// Headers never logged verbatim, regardless of `mask_sensitive_headers`.
const SENSITIVE_HEADERS: &[&str] = &["authorization", "cookie", "set-cookie", "x-api-key", "x-auth-token"];

/// Injects the request-ID into the outgoing response headers.
pub struct RequestTracking {
    config: RequestTrackingConfig,
}

impl RequestTracking {
    pub fn new(config: RequestTrackingConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Middleware for RequestTracking {
    async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<()> {
        if self.config.request_id_enabled {
            ctx.response
                .set_header(self.config.request_id_header.clone(), ctx.request_id.as_str());
        }
        next.run(ctx).await
    }
}

/// Masks sensitive header values for logging. Never mutates the headers
/// themselves; used only at the log call site.
pub fn masked_headers(headers: &crate::headers::HeaderMap, mask: bool) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            if mask && SENSITIVE_HEADERS.iter().any(|s| name.eq_ignore_ascii_case(s)) {
                (name.clone(), "***".to_string())
            } else {
                (name.clone(), value.clone())
            }
        })
        .collect()
}
