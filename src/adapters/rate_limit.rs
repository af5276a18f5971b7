//! Per-adapter-instance rate limiting.
//!
//! Each adapter instance owns one [`RateLimiter`] holding the time of its
//! last outbound call. Before every production call the limiter waits until
//! the adapter's minimum spacing has elapsed. The read-then-write of that
//! timestamp happens under one async mutex per limiter, so concurrent
//! callers on the same instance queue up instead of racing; limiters of
//! different instances never contend.
//!
//! Time goes through a [`Clock`] so tests can swap in a [`ManualClock`]
//! and never wait in real time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Source of time for rate limiting and retry backoff
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    /// Suspend the caller for `duration`
    async fn sleep(&self, duration: Duration);
}

/// Real time via the tokio timer
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Virtual clock: `sleep` advances time instantly.
///
/// Useful in tests and simulations where waiting 15 seconds between calls
/// would be pointless. `elapsed()` reports how much virtual time has passed.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset_ms: AtomicU64,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset_ms: AtomicU64::new(0),
        }
    }

    /// Move virtual time forward
    pub fn advance(&self, duration: Duration) {
        self.offset_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    /// Total virtual time passed since construction
    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.offset_ms.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

/// Enforces a minimum interval between outbound calls of one adapter instance
pub struct RateLimiter {
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("min_interval", &self.min_interval)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    pub fn new(min_interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            min_interval,
            last_request: Mutex::new(None),
            clock,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Wait until the next call is allowed, then record it.
    ///
    /// Returns how long the caller was held back. Dropping the returned
    /// future mid-wait leaves the recorded time untouched.
    pub async fn acquire(&self) -> Duration {
        let mut last = self.last_request.lock().await;
        let mut waited = Duration::ZERO;

        if let Some(previous) = *last {
            let elapsed = self.clock.now().saturating_duration_since(previous);
            if elapsed < self.min_interval {
                waited = self.min_interval - elapsed;
                debug!(wait_ms = waited.as_millis() as u64, "Rate limit spacing, waiting");
                self.clock.sleep(waited).await;
            }
        }

        *last = Some(self.clock.now());
        waited
    }

    /// Forget the last call; the next `acquire` proceeds immediately
    pub async fn reset(&self) {
        *self.last_request.lock().await = None;
    }

    /// Pretend the last call happened at `at`
    pub async fn seed(&self, at: Instant) {
        *self.last_request.lock().await = Some(at);
    }

    pub async fn last_request(&self) -> Option<Instant> {
        *self.last_request.lock().await
    }
}
