//! Handler chain / middleware composition.
//!
//! A [`Middleware`] wraps a handler; the chain composes outer-to-inner so
//! the first middleware appended is outermost (runs first on the way in,
//! last on the way out). [`Recover`] and [`ErrorHandler`] are always
//! present: the former converts a panic to a 500, the latter guarantees the
//! chain never hands a raw error back to the dispatch loop.

use crate::context::Context;
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// A terminal unit of work selected by the router.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, ctx: &mut Context) -> Result<()>;
}

type BoxHandlerFn =
    Arc<dyn for<'a> Fn(&'a mut Context) -> futures::future::BoxFuture<'a, Result<()>> + Send + Sync>;

/// Adapts a plain async closure into a [`Handler`].
pub struct FnHandler(BoxHandlerFn);

#[async_trait]
impl Handler for FnHandler {
    async fn call(&self, ctx: &mut Context) -> Result<()> {
        (self.0)(ctx).await
    }
}

/// Wraps `f` as a [`Handler`]. `f` must return a boxed future because
/// `Handler::call` is itself async-trait-boxed; this keeps call sites
/// terse: `handler_fn(|ctx| Box::pin(async move { ... }))`.
pub fn handler_fn<F>(f: F) -> Arc<dyn Handler>
where
    F: for<'a> Fn(&'a mut Context) -> futures::future::BoxFuture<'a, Result<()>> + Send + Sync + 'static,
{
    Arc::new(FnHandler(Arc::new(f)))
}

/// Cross-cutting behavior interposed around a handler.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<()>;
}

/// The remainder of the chain: zero or more middlewares followed by the
/// terminal handler.
pub struct Next<'a> {
    middlewares: &'a [Arc<dyn Middleware>],
    handler: &'a dyn Handler,
}

impl<'a> Next<'a> {
    /// Builds a `Next` over an explicit remainder, for middleware unit tests
    /// that want to invoke a single `Middleware::handle` in isolation.
    pub fn new(middlewares: &'a [Arc<dyn Middleware>], handler: &'a dyn Handler) -> Self {
        Self { middlewares, handler }
    }

    pub async fn run(self, ctx: &mut Context) -> Result<()> {
        match self.middlewares.split_first() {
            Some((first, rest)) => {
                first
                    .handle(
                        ctx,
                        Next {
                            middlewares: rest,
                            handler: self.handler,
                        },
                    )
                    .await
            }
            None => self.handler.call(ctx).await,
        }
    }
}

/// Converts a handler panic into a 500 `PANIC_RECOVERED` response instead of
/// unwinding into the dispatch loop. Always the innermost user-visible
/// middleware (just around the handler itself), so a panic anywhere in a
/// later middleware or the handler is caught here.
pub struct Recover;

#[async_trait]
impl Middleware for Recover {
    async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<()> {
        match AssertUnwindSafe(next.run(ctx)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(&panic);
                tracing::error!(panic = %message, "handler panicked");
                Err(Error::Panic(message))
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Always the outermost middleware: guarantees exactly one terminal
/// response is produced, converting any propagated [`Error`] into the
/// sanitized response body via [`Error::into_lift_error`].
pub struct ErrorHandler;

#[async_trait]
impl Middleware for ErrorHandler {
    async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<()> {
        if let Err(err) = next.run(ctx).await {
            let lift_err = err.into_lift_error();
            tracing::error!(
                request_id = %ctx.request_id,
                code = lift_err.code,
                status = lift_err.status,
                "request failed"
            );
            ctx.response.overwrite(
                lift_err.status,
                serde_json::json!({ "code": lift_err.code, "message": lift_err.message }),
            );
        }
        Ok(())
    }
}

/// Assembles the ordered middleware stack around a handler and runs an
/// invocation end to end. `ErrorHandler` is always outermost and `Recover`
/// always innermost (just outside the handler), regardless of what's
/// appended in between.
pub struct Chain {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl Chain {
    pub fn new() -> Self {
        Self {
            middlewares: vec![Arc::new(ErrorHandler)],
        }
    }

    /// Appends a middleware; the first one appended runs first on the way
    /// in, last on the way out.
    pub fn append(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub async fn run(&self, handler: &dyn Handler, ctx: &mut Context) -> Result<()> {
        let mut middlewares = self.middlewares.clone();
        middlewares.push(Arc::new(Recover));
        let next = Next {
            middlewares: &middlewares,
            handler,
        };
        next.run(ctx).await
    }
}

impl Default for Chain {
    fn default() -> Self {
        Self::new()
    }
}
