//! Priority-aware bulkhead isolation: three slot pools (global, tenant,
//! operation) acquired in order and released in reverse. Each pool is a
//! hand-rolled priority wait structure rather than `tokio::sync::Semaphore`
//! (plain FIFO), since waiters must be served highest-priority-first and
//! must be able to drop out of the queue the moment the request's context is
//! cancelled.

use crate::config::BulkheadConfig;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::handler::{Middleware, Next};
use async_trait::async_trait;
use dashmap::DashMap;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// A queued acquirer, ordered highest-priority-first; ties broken in arrival
/// order (lower `seq` wins).
struct Waiter {
    priority: u8,
    seq: u64,
    tx: oneshot::Sender<()>,
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl Eq for Waiter {}
impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Waiter {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority.cmp(&other.priority).then_with(|| other.seq.cmp(&self.seq))
    }
}

struct PoolState {
    in_use: usize,
    waiters: BinaryHeap<Waiter>,
    next_seq: u64,
}

/// A capacity-bounded pool of slots with a priority-ordered wait queue.
/// A released slot is handed directly to the highest-priority waiter rather
/// than returned to the pool, so a busy pool never starves high-priority
/// traffic behind a long FIFO.
struct SlotPool {
    limit: usize,
    state: Mutex<PoolState>,
}

impl SlotPool {
    fn new(limit: usize) -> Arc<Self> {
        Arc::new(Self {
            limit,
            state: Mutex::new(PoolState {
                in_use: 0,
                waiters: BinaryHeap::new(),
                next_seq: 0,
            }),
        })
    }

    async fn acquire(
        self: Arc<Self>,
        priority: u8,
        wait: Duration,
        cancel: &CancellationToken,
    ) -> Result<SlotGuard> {
        {
            let mut state = self.state.lock().unwrap();
            if state.in_use < self.limit {
                state.in_use += 1;
                return Ok(SlotGuard { pool: Arc::downgrade(&self) });
            }
        }

        let (tx, rx) = oneshot::channel();
        let seq;
        {
            let mut state = self.state.lock().unwrap();
            seq = state.next_seq;
            state.next_seq += 1;
            state.waiters.push(Waiter { priority, seq, tx });
        }

        tokio::select! {
            res = rx => match res {
                Ok(()) => Ok(SlotGuard { pool: Arc::downgrade(&self) }),
                Err(_) => Err(Error::BulkheadExceeded("slot pool closed".into())),
            },
            _ = tokio::time::sleep(wait) => {
                self.remove_waiter(seq);
                Err(Error::BulkheadExceeded("wait timeout exceeded".into()))
            }
            _ = cancel.cancelled() => {
                self.remove_waiter(seq);
                Err(Error::BulkheadExceeded("request cancelled while waiting".into()))
            }
        }
    }

    fn remove_waiter(&self, seq: u64) {
        let mut state = self.state.lock().unwrap();
        if state.waiters.iter().any(|w| w.seq == seq) {
            let remaining: Vec<Waiter> = state.waiters.drain().filter(|w| w.seq != seq).collect();
            state.waiters = remaining.into_iter().collect();
        }
    }

    /// Hands the freed slot to the highest-priority waiter if one is queued;
    /// otherwise returns it to the pool.
    fn release(&self) {
        let mut state = self.state.lock().unwrap();
        while let Some(waiter) = state.waiters.pop() {
            if waiter.tx.send(()).is_ok() {
                return;
            }
            // Receiver already gave up (timed out/cancelled) between being
            // popped and being woken; keep looking for a live waiter.
        }
        state.in_use = state.in_use.saturating_sub(1);
    }
}

struct SlotGuard {
    pool: Weak<SlotPool>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.upgrade() {
            pool.release();
        }
    }
}

pub struct Bulkhead {
    config: BulkheadConfig,
    global: Arc<SlotPool>,
    tenants: DashMap<String, Arc<SlotPool>>,
    operations: DashMap<String, Arc<SlotPool>>,
    priority: Box<dyn Fn(&Context) -> u8 + Send + Sync>,
}

impl Bulkhead {
    pub fn new(config: BulkheadConfig) -> Self {
        let global = SlotPool::new(config.global_limit);
        Self {
            config,
            global,
            tenants: DashMap::new(),
            operations: DashMap::new(),
            priority: Box::new(|_| 0),
        }
    }

    /// Overrides how a request's queue priority is derived from its context;
    /// higher values are served first when a pool is saturated. Defaults to
    /// a flat priority of 0 (pure FIFO) for every request.
    pub fn with_priority_fn(mut self, f: impl Fn(&Context) -> u8 + Send + Sync + 'static) -> Self {
        self.priority = Box::new(f);
        self
    }

    fn tenant_pool(&self, tenant_id: &str) -> Option<Arc<SlotPool>> {
        let limit = self.config.tenant_limit?;
        Some(
            self.tenants
                .entry(tenant_id.to_string())
                .or_insert_with(|| SlotPool::new(limit))
                .clone(),
        )
    }

    fn operation_pool(&self, operation: &str) -> Option<Arc<SlotPool>> {
        let limit = self.config.operation_limit?;
        Some(
            self.operations
                .entry(operation.to_string())
                .or_insert_with(|| SlotPool::new(limit))
                .clone(),
        )
    }

    /// Acquires global, then tenant, then operation slots in order. If any
    /// acquisition fails (timeout or cancellation), previously acquired
    /// slots are released automatically when the partially-filled `Vec`
    /// goes out of scope.
    async fn acquire(&self, ctx: &Context) -> Result<Vec<SlotGuard>> {
        let wait = Duration::from_millis(self.config.max_wait_ms);
        let priority = self.priority.as_ref()(ctx);
        let cancel = ctx.cancellation_token();
        let mut guards = Vec::with_capacity(3);

        guards.push(self.global.clone().acquire(priority, wait, &cancel).await?);

        if let Some(pool) = self.tenant_pool(&ctx.tenant_id) {
            guards.push(pool.acquire(priority, wait, &cancel).await?);
        }

        let operation = format!("{}:{}", ctx.request.method, ctx.request.path);
        if let Some(pool) = self.operation_pool(&operation) {
            guards.push(pool.acquire(priority, wait, &cancel).await?);
        }

        Ok(guards)
    }
}

#[async_trait]
impl Middleware for Bulkhead {
    async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<()> {
        if !self.config.enabled {
            return next.run(ctx).await;
        }

        let _guards = self.acquire(ctx).await?;
        next.run(ctx).await
    }
}
