//! Concurrency gating using a token bucket
//!
//! The RateLimiter caps how many fetch/transcode jobs may start within a
//! window. It is a cheap, cloneable handle over lock-free atomic state, so the
//! queue, tests and any embedder all observe the same bucket.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::config::RateLimitConfig;

/// Token bucket shared by all jobs
///
/// # Algorithm
///
/// - The bucket starts full with `max_tokens` tokens
/// - `acquire()` takes one token, polling at the refill interval while empty
/// - `release()` returns one token, never exceeding `max_tokens`
/// - One token is regained for every whole refill interval that elapsed,
///   computed lazily at each acquire/release
///
/// # Implementation
///
/// - `tokens`: available tokens, always within `[0, max_tokens]`
/// - `last_refill`: monotonic timestamp (nanoseconds) of the last credited
///   interval boundary. It advances by whole intervals only, so the remainder
///   of a partially elapsed interval is never lost or counted twice.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    max_tokens: u64,
    refill_interval: Duration,
    tokens: Arc<AtomicU64>,
    last_refill: Arc<AtomicU64>,
}

impl RateLimiter {
    /// Create a full bucket
    ///
    /// A zero `max_tokens` is raised to 1 and a zero interval to 1ms, since
    /// either would make `acquire()` wait forever or spin.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use track_fetch::rate_limiter::RateLimiter;
    ///
    /// let limiter = RateLimiter::new(3, Duration::from_secs(1));
    /// assert_eq!(limiter.available(), 3);
    /// ```
    #[must_use]
    pub fn new(max_tokens: u32, refill_interval: Duration) -> Self {
        let max_tokens = u64::from(max_tokens.max(1));
        let refill_interval = refill_interval.max(Duration::from_millis(1));

        Self {
            max_tokens,
            refill_interval,
            tokens: Arc::new(AtomicU64::new(max_tokens)),
            last_refill: Arc::new(AtomicU64::new(Self::now_nanos())),
        }
    }

    /// Create a limiter from its config section
    #[must_use]
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.max_tokens, config.refill_interval)
    }

    /// Bucket capacity
    pub fn max_tokens(&self) -> u32 {
        self.max_tokens as u32
    }

    /// Tokens available right now (after crediting elapsed intervals)
    pub fn available(&self) -> u32 {
        self.refill_tokens();
        self.tokens.load(Ordering::SeqCst) as u32
    }

    /// Take one token, waiting until one is free
    ///
    /// While the bucket is empty this sleeps for one refill interval between
    /// checks. Callers that need the token back on every exit path should use
    /// [`RateLimiter::acquire_guard`] instead.
    pub async fn acquire(&self) {
        loop {
            self.refill_tokens();

            let current = self.tokens.load(Ordering::SeqCst);
            if current > 0 {
                if self
                    .tokens
                    .compare_exchange(current, current - 1, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    return;
                }
                // Lost a race with another acquire/release; re-read immediately
                continue;
            }

            tokio::time::sleep(self.refill_interval).await;
        }
    }

    /// Take one token and return a guard that releases it when dropped
    pub async fn acquire_guard(&self) -> RateLimitGuard {
        self.acquire().await;
        RateLimitGuard {
            limiter: self.clone(),
        }
    }

    /// Return one token; no-op when the bucket is already full
    pub fn release(&self) {
        self.refill_tokens();

        let max = self.max_tokens;
        let _ = self
            .tokens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current < max).then_some(current + 1)
            });
    }

    /// Credit one token per whole refill interval elapsed since `last_refill`
    fn refill_tokens(&self) {
        let interval = self.refill_interval.as_nanos() as u64;
        let now = Self::now_nanos();
        let last = self.last_refill.load(Ordering::SeqCst);

        let intervals = now.saturating_sub(last) / interval;
        if intervals == 0 {
            return;
        }

        // Only the caller that moves the boundary credits the tokens
        if self
            .last_refill
            .compare_exchange(
                last,
                last + intervals * interval,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
        {
            let max = self.max_tokens;
            let _ = self
                .tokens
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                    Some(current.saturating_add(intervals).min(max))
                });
        }
    }

    /// Monotonic time in nanoseconds since an arbitrary process-wide epoch
    fn now_nanos() -> u64 {
        static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
        let start = START.get_or_init(Instant::now);
        start.elapsed().as_nanos() as u64
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::from_config(&RateLimitConfig::default())
    }
}

/// A held token; released back to the bucket on drop
#[derive(Debug)]
#[must_use = "the token is released as soon as the guard is dropped"]
pub struct RateLimitGuard {
    limiter: RateLimiter,
}

impl Drop for RateLimitGuard {
    fn drop(&mut self) {
        self.limiter.release();
    }
}
