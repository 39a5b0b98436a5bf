//! Injectable time source.
//!
//! All durations and deadlines in the resilience middlewares flow through a
//! [`Clock`] rather than calling `SystemTime::now()`/`Instant::now()`
//! directly, so tests can drive sliding windows, TTLs, and backoffs
//! deterministically.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// A source of the current time, injectable so tests can control it.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Returns the current wall-clock time.
    fn now(&self) -> DateTime<Utc>;
}

/// The real wall clock, backed by `Utc::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A manually-advanced clock for deterministic tests.
///
/// Starts at the Unix epoch unless constructed `with_time`; advance it with
/// [`ManualClock::advance`] or pin it with [`ManualClock::set`].
#[derive(Debug, Clone)]
pub struct ManualClock {
    millis_since_epoch: Arc<AtomicI64>,
}

impl ManualClock {
    /// Creates a clock starting at the given time.
    pub fn with_time(time: DateTime<Utc>) -> Self {
        Self {
            millis_since_epoch: Arc::new(AtomicI64::new(time.timestamp_millis())),
        }
    }

    /// Advances the clock by the given duration.
    pub fn advance(&self, duration: chrono::Duration) {
        self.millis_since_epoch
            .fetch_add(duration.num_milliseconds(), Ordering::SeqCst);
    }

    /// Pins the clock to an exact time.
    pub fn set(&self, time: DateTime<Utc>) {
        self.millis_since_epoch
            .store(time.timestamp_millis(), Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::with_time(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.millis_since_epoch.load(Ordering::SeqCst))
            .expect("manual clock millis always in range")
    }
}

/// A shared, type-erased clock handle, cheap to clone and pass around.
pub type SharedClock = Arc<dyn Clock>;

/// Returns a shared handle to the real system clock.
pub fn system() -> SharedClock {
    Arc::new(SystemClock)
}
