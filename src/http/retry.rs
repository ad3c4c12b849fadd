//! Retry policy: failure classification and backoff scheduling.

// std
use std::cell::RefCell;
// crates.io
use http::StatusCode;
use rand::{Rng, SeedableRng, rngs::SmallRng};
// self
use crate::_prelude::*;

thread_local! {
    static SMALL_RNG: RefCell<SmallRng> = RefCell::new(SmallRng::from_rng(&mut rand::rng()));
}

/// Default number of retries after the initial attempt.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
/// Base delay before the first retry.
pub const BASE_BACKOFF: Duration = Duration::from_millis(500);
/// Upper bound applied to exponential backoff growth.
pub const MAX_BACKOFF: Duration = Duration::from_secs(10);
/// Jitter applied around the computed backoff, as a fraction.
pub const JITTER_FRACTION: f64 = 0.2;

/// Retry configuration for one site.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial attempt.
    pub max_retries: u32,
    /// Initial delay before retrying after a failure.
    pub base_backoff: Duration,
    /// Upper bound applied to exponential growth.
    pub max_backoff: Duration,
}
impl RetryPolicy {
    /// Policy with the given retry budget and default delays.
    pub fn with_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Compute the backoff for a zero-based retry attempt: exponential with
    /// factor two, random jitter of ±20 %, capped at [`MAX_BACKOFF`].
    pub fn compute_backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let base = self
            .base_backoff
            .mul_f64(2f64.powi(exponent as i32))
            .min(self.max_backoff);
        let jitter = SMALL_RNG.with(|cell| {
            cell.borrow_mut()
                .random_range(-JITTER_FRACTION..=JITTER_FRACTION)
        });

        base.mul_f64(1.0 + jitter).min(self.max_backoff)
    }
}
impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_RETRY_ATTEMPTS,
            base_backoff: BASE_BACKOFF,
            max_backoff: MAX_BACKOFF,
        }
    }
}

/// How a failed attempt should be handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryClass {
    /// Retry is permitted for any operation.
    Transient,
    /// Retry is permitted only for idempotent operations.
    TransientIdempotentOnly,
    /// The failure is final; surface it immediately.
    Fatal,
}

/// Classify an HTTP status for retry purposes.
///
/// 429 and 503 carry server pacing hints and are retryable even for
/// mutations; other 5xx retry only when the operation is idempotent; 4xx is
/// final.
pub fn classify_status(status: StatusCode) -> RetryClass {
    match status {
        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => RetryClass::Transient,
        status if status.is_server_error() => RetryClass::TransientIdempotentOnly,
        _ => RetryClass::Fatal,
    }
}

/// Classify a transport error for retry purposes.
///
/// Connection establishment failures never transmitted the request and are
/// safe to retry for any operation; failures after bytes may have been sent
/// retry only when idempotent.
pub fn classify_transport(err: &reqwest::Error) -> RetryClass {
    if err.is_connect() {
        RetryClass::Transient
    } else if err.is_timeout() || err.is_request() {
        RetryClass::TransientIdempotentOnly
    } else {
        RetryClass::Fatal
    }
}

/// Tracks the retry budget and backoff progression for one logical request.
#[derive(Debug)]
pub struct RetryState {
    policy: RetryPolicy,
    retries_used: u32,
    last_delay: Duration,
}
impl RetryState {
    /// Fresh state for the supplied policy.
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            retries_used: 0,
            last_delay: Duration::ZERO,
        }
    }

    /// Attempts performed so far, counting the initial request.
    pub fn attempts(&self) -> u32 {
        self.retries_used + 1
    }

    /// Whether another retry is permitted under the policy.
    pub fn can_retry(&self) -> bool {
        self.retries_used < self.policy.max_retries
    }

    /// Consume one retry and compute its delay, honoring a server-provided
    /// `Retry-After` hint exactly when it exceeds the computed backoff.
    pub fn next_delay(&mut self, retry_after: Option<Duration>) -> Option<Duration> {
        if !self.can_retry() {
            tracing::debug!(retries = self.retries_used, "retry budget exhausted");

            return None;
        }

        let attempt = self.retries_used;

        self.retries_used += 1;

        let mut delay = self.policy.compute_backoff(attempt);

        // Backoff never shrinks between consecutive retries of one request.
        delay = delay.max(self.last_delay);

        if let Some(hint) = retry_after
            && hint > delay
        {
            delay = hint;
        }

        self.last_delay = delay;

        tracing::debug!(
            attempt = attempt + 1,
            ?delay,
            ?retry_after,
            "retry backoff computed"
        );

        Some(delay)
    }
}
