//! The per-invocation context threaded through the handler chain.

use crate::clock::{Clock, SharedClock};
use crate::ids::RequestId;
use crate::observability::MetricsCollector;
use crate::request::Request;
use crate::response::Response;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Authenticated-principal record populated by the auth middleware on
/// success.
#[derive(Debug, Clone, Default)]
pub struct Principal {
    pub user_id: String,
    pub tenant_id: String,
    pub account_id: Option<String>,
    pub roles: Vec<String>,
    pub scopes: Vec<String>,
    pub auth_method: Option<String>,
    pub issued_at: Option<i64>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub request_id: Option<String>,
}

impl Principal {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

/// Bundles request, response, deadline, identity, and injected capabilities
/// for a single invocation. Owned by that invocation and dropped after, so
/// it participates in no reference cycles.
pub struct Context {
    pub request: Request,
    pub response: Response,
    pub request_id: RequestId,
    pub tenant_id: String,
    pub user_id: String,
    pub claims: HashMap<String, Value>,
    pub principal: Option<Principal>,
    scratch: HashMap<String, Value>,
    cancellation: CancellationToken,
    deadline: Option<Instant>,
    clock: SharedClock,
    metrics: Arc<dyn MetricsCollector>,
}

impl Context {
    pub fn new(request: Request, clock: SharedClock, metrics: Arc<dyn MetricsCollector>) -> Self {
        Self {
            request,
            response: Response::new(),
            request_id: RequestId::new(),
            tenant_id: String::new(),
            user_id: String::new(),
            claims: HashMap::new(),
            principal: None,
            scratch: HashMap::new(),
            cancellation: CancellationToken::new(),
            deadline: None,
            clock,
            metrics,
        }
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn metrics(&self) -> &dyn MetricsCollector {
        self.metrics.as_ref()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Derives a new, shorter-lived cancellation scope for a retry/timeout/
    /// bulkhead wrapper, without handing the parent token to anything
    /// long-lived.
    pub fn child_token(&self) -> CancellationToken {
        self.cancellation.child_token()
    }

    /// Installs `token` as the context's active cancellation scope, returning
    /// the one it replaces. A wrapper middleware (timeout, bulkhead) that
    /// derives a child token and wants downstream code to actually observe
    /// cancellation on it must swap it in before calling `next.run`, then
    /// swap the original back afterward.
    pub fn swap_cancellation(&mut self, token: CancellationToken) -> CancellationToken {
        std::mem::replace(&mut self.cancellation, token)
    }

    pub fn set_deadline(&mut self, timeout: Duration) {
        self.deadline = Some(Instant::now() + timeout);
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Scratch key-value storage, visible to every downstream middleware and
    /// handler once a middleware writes to it.
    pub fn set_scratch(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.scratch.insert(key.into(), value.into());
    }

    pub fn scratch(&self, key: &str) -> Option<&Value> {
        self.scratch.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::system;
    use crate::observability::NoopMetrics;
    use crate::request::{Request, TriggerSource};

    fn ctx() -> Context {
        Context::new(
            Request::new("GET", "/x", TriggerSource::HttpV1),
            system(),
            Arc::new(NoopMetrics),
        )
    }

    #[test]
    fn request_id_is_non_empty_by_construction() {
        let c = ctx();
        assert!(!c.request_id.as_str().is_empty());
    }

    #[test]
    fn scratch_values_are_visible_after_write() {
        let mut c = ctx();
        c.set_scratch("account_id", "acc-1");
        assert_eq!(c.scratch("account_id").unwrap(), "acc-1");
    }

    #[test]
    fn principal_role_lookup() {
        let p = Principal {
            roles: vec!["admin".into()],
            ..Default::default()
        };
        assert!(p.has_role("admin"));
        assert!(!p.has_role("superadmin"));
    }

    #[test]
    fn child_tokens_cancel_with_parent_but_not_vice_versa() {
        let c = ctx();
        let child = c.child_token();
        c.cancel();
        assert!(child.is_cancelled());
    }
}
