//! Per-site token-bucket rate limiting and the process-wide concurrency gate.

// std
use std::sync::Mutex;
// crates.io
use tokio::sync::{Semaphore, SemaphorePermit};
// self
use crate::{_prelude::*, context::Ctx};

/// Default per-site budget: 600 requests per minute.
pub const DEFAULT_RATE_PER_MINUTE: u32 = 600;
/// Default burst allowance per site.
pub const DEFAULT_BURST: u32 = 10;
/// Default bound on concurrent outbound requests across all sites.
pub const DEFAULT_GLOBAL_CONCURRENCY: usize = 32;

/// Token bucket gating outbound requests for one site.
///
/// A grant covers exactly one HTTP attempt; retries re-acquire. Refill is
/// lazy: tokens accrue on each acquire from the elapsed time since the last
/// refill, capped at the burst capacity.
#[derive(Debug)]
pub struct RateLimiter {
    site_id: String,
    capacity: f64,
    refill_per_second: f64,
    state: Mutex<BucketState>,
}
impl RateLimiter {
    /// Build a limiter refilling `per_minute` tokens with `burst` capacity.
    pub fn new(site_id: impl Into<String>, per_minute: u32, burst: u32) -> Self {
        let capacity = burst.max(1) as f64;

        Self {
            site_id: site_id.into(),
            capacity,
            refill_per_second: per_minute.max(1) as f64 / 60.0,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Acquire one token, sleeping until a token accrues, the context is
    /// cancelled, or its deadline expires.
    pub async fn acquire(&self, ctx: &Ctx) -> Result<()> {
        loop {
            ctx.check()?;

            let wait = {
                let mut state = self.state.lock().expect("rate limiter mutex poisoned");

                state.refill(self.capacity, self.refill_per_second);

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;

                    return Ok(());
                }

                Duration::from_secs_f64((1.0 - state.tokens) / self.refill_per_second)
            };

            if let Some(remaining) = ctx.remaining()
                && remaining < wait
            {
                tracing::debug!(site = %self.site_id, ?wait, ?remaining, "rate wait exceeds deadline");

                return Err(Error::RateLimited {
                    site: self.site_id.clone(),
                });
            }

            ctx.sleep(wait).await?;
        }
    }

    /// Tokens currently available, for diagnostics.
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock().expect("rate limiter mutex poisoned");

        state.refill(self.capacity, self.refill_per_second);
        state.tokens
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}
impl BucketState {
    fn refill(&mut self, capacity: f64, per_second: f64) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last_refill);

        self.tokens = (self.tokens + elapsed.as_secs_f64() * per_second).min(capacity);
        self.last_refill = now;
    }
}

/// Process-wide semaphore bounding concurrent outbound requests.
#[derive(Debug)]
pub struct GlobalLimiter {
    permits: Semaphore,
}
impl GlobalLimiter {
    /// Build a limiter with the given concurrency bound.
    pub fn new(concurrency: usize) -> Self {
        Self {
            permits: Semaphore::new(concurrency.max(1)),
        }
    }

    /// Acquire a concurrency permit, honoring the context.
    pub async fn acquire(&self, ctx: &Ctx) -> Result<SemaphorePermit<'_>> {
        ctx.run(async {
            self.permits
                .acquire()
                .await
                .map_err(|_| Error::Transport("Limiter closed.".into()))
        })
        .await
    }

    /// Permits currently available, for diagnostics.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}
impl Default for GlobalLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_GLOBAL_CONCURRENCY)
    }
}

#[cfg(test)]
mod tests {
    // self
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn burst_drains_then_waits_for_refill() {
        let limiter = RateLimiter::new("s1", 60, 2);
        let ctx = Ctx::background();

        limiter.acquire(&ctx).await.expect("first");
        limiter.acquire(&ctx).await.expect("second");

        let before = Instant::now();

        limiter.acquire(&ctx).await.expect("third");

        // 60/min refills one token per second.
        assert!(before.elapsed() >= Duration::from_millis(990));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_shorter_than_wait_fails_fast() {
        let limiter = RateLimiter::new("s1", 60, 1);
        let ctx = Ctx::background();

        limiter.acquire(&ctx).await.expect("drain burst");

        let bounded = Ctx::with_timeout(Duration::from_millis(100));
        let err = limiter.acquire(&bounded).await.unwrap_err();

        assert!(matches!(err, Error::RateLimited { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_the_wait() {
        let limiter = Arc::new(RateLimiter::new("s1", 60, 1));
        let ctx = Ctx::background();

        limiter.acquire(&ctx).await.expect("drain burst");

        let waiter = limiter.clone();
        let waiter_ctx = ctx.clone();
        let handle = tokio::spawn(async move { waiter.acquire(&waiter_ctx).await });

        tokio::task::yield_now().await;
        ctx.cancel();

        assert!(matches!(handle.await.expect("join"), Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn global_limiter_tracks_permits() {
        let limiter = GlobalLimiter::new(2);
        let ctx = Ctx::background();
        let _first = limiter.acquire(&ctx).await.expect("permit");

        assert_eq!(limiter.available(), 1);
    }
}
