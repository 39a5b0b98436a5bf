//! Security response headers, set directly on [`crate::response::Response`]
//! rather than layered on via `tower_http::set_header`.

use crate::config::SecurityHeadersConfig;
use crate::context::Context;
use crate::error::Result;
use crate::handler::{Middleware, Next};
use async_trait::async_trait;

pub struct SecurityHeaders {
    config: SecurityHeadersConfig,
}

impl SecurityHeaders {
    pub fn new(config: SecurityHeadersConfig) -> Self {
        Self { config }
    }

    fn is_sensitive_path(&self, path: &str) -> bool {
        self.config
            .sensitive_path_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }

    /// TLS is inferred from `X-Forwarded-Proto`/`X-Forwarded-Ssl`, the way a
    /// Lambda sitting behind API Gateway or an ALB sees it — Lift itself
    /// never terminates TLS.
    fn is_tls(&self, ctx: &Context) -> bool {
        ctx.request
            .header("X-Forwarded-Proto")
            .map(|v| v.eq_ignore_ascii_case("https"))
            .or_else(|| ctx.request.header("X-Forwarded-Ssl").map(|v| v.eq_ignore_ascii_case("on")))
            .unwrap_or(false)
    }
}

#[async_trait]
impl Middleware for SecurityHeaders {
    async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<()> {
        let result = next.run(ctx).await;

        if !self.config.enabled {
            return result;
        }

        if self.is_tls(ctx) && self.config.hsts {
            let mut value = format!("max-age={}", self.config.hsts_max_age_secs);
            if self.config.hsts_include_subdomains {
                value.push_str("; includeSubDomains");
            }
            if self.config.hsts_preload {
                value.push_str("; preload");
            }
            ctx.response.set_header("Strict-Transport-Security", value);
        }

        if self.config.x_content_type_options {
            ctx.response.set_header("X-Content-Type-Options", "nosniff");
        }
        if !self.config.x_frame_options.is_empty() {
            ctx.response
                .set_header("X-Frame-Options", self.config.x_frame_options.clone());
        }
        if self.config.x_xss_protection {
            ctx.response.set_header("X-XSS-Protection", "0");
        }
        if !self.config.content_security_policy.is_empty() {
            ctx.response
                .set_header("Content-Security-Policy", self.config.content_security_policy.clone());
        }
        if !self.config.referrer_policy.is_empty() {
            ctx.response
                .set_header("Referrer-Policy", self.config.referrer_policy.clone());
        }
        if let Some(policy) = &self.config.permissions_policy {
            ctx.response.set_header("Permissions-Policy", policy.clone());
        }

        if self.is_sensitive_path(&ctx.request.path) {
            ctx.response
                .set_header("Cache-Control", "no-store, no-cache, must-revalidate, private");
            ctx.response.set_header("Pragma", "no-cache");
            ctx.response.set_header("Expires", "0");
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

    async fn run(config: SecurityHeadersConfig, tls: bool, path: &str) -> Context {
        let middleware = SecurityHeaders::new(config);
        let mut ctx = Context::new(
            Request::new("GET", path, TriggerSource::HttpV1),
            system(),
            Arc::new(NoopMetrics),
        );
        if tls {
            ctx.request.headers.set("X-Forwarded-Proto", "https");
        }
        let handler = Ok200;
        let recover: Arc<dyn Middleware> = Arc::new(Recover);
        let chain = [recover];
        let next = Next::new(&chain, &handler);
        middleware.handle(&mut ctx, next).await.unwrap();
        ctx
    }

    #[tokio::test]
    async fn hsts_only_sent_over_tls() {
        let ctx = run(SecurityHeadersConfig::default(), false, "/hello").await;
        assert!(ctx.response.headers().get("Strict-Transport-Security").is_none());

        let ctx = run(SecurityHeadersConfig::default(), true, "/hello").await;
        assert!(ctx.response.headers().get("Strict-Transport-Security").is_some());
    }

    #[tokio::test]
    async fn sensitive_paths_get_no_store_cache_control() {
        let ctx = run(SecurityHeadersConfig::default(), true, "/auth/login").await;
        assert_eq!(
            ctx.response.headers().get("Cache-Control"),
            Some("no-store, no-cache, must-revalidate, private")
        );
    }

    #[tokio::test]
    async fn non_sensitive_paths_have_no_cache_control() {
        let ctx = run(SecurityHeadersConfig::default(), true, "/hello").await;
        assert!(ctx.response.headers().get("Cache-Control").is_none());
    }
}
