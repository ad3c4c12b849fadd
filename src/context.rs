//! Request context carrying a deadline and a cancellation signal.
//!
//! Every suspension point in the crate (rate wait, single-flight join, HTTP
//! transport, retry backoff) checks the context and propagates `Cancelled`
//! or `Timeout` instead of blocking past the caller's budget.

// crates.io
use tokio::time;
use tokio_util::sync::CancellationToken;
// self
use crate::_prelude::*;

/// Cancellation and deadline scope for a single operation.
#[derive(Clone, Debug, Default)]
pub struct Ctx {
    deadline: Option<Instant>,
    cancel: CancellationToken,
}
impl Ctx {
    /// Context without a deadline; cancellable only through its token.
    pub fn background() -> Self {
        Self::default()
    }

    /// Context that expires after the given duration.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            cancel: CancellationToken::new(),
        }
    }

    /// Context that expires at the given instant.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            cancel: CancellationToken::new(),
        }
    }

    /// Derive a child context sharing this cancellation scope but bounded by
    /// an additional timeout.
    pub fn child(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) => Some(existing.min(candidate)),
            None => Some(candidate),
        };

        Self {
            deadline,
            cancel: self.cancel.child_token(),
        }
    }

    /// The cancellation token backing this context.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Request cancellation of every operation bound to this context.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Absolute deadline, when one was set.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Remaining budget until the deadline; `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Fail fast when the context is cancelled or past its deadline.
    pub fn check(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if let Some(remaining) = self.remaining()
            && remaining.is_zero()
        {
            return Err(Error::Timeout);
        }

        Ok(())
    }

    /// Sleep for `duration`, waking early on cancellation or deadline expiry.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        self.check()?;

        if duration.is_zero() {
            return Ok(());
        }

        let capped = match self.remaining() {
            Some(remaining) if remaining < duration => {
                tokio::select! {
                    _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                    _ = time::sleep(remaining) => return Err(Error::Timeout),
                }
            }
            _ => duration,
        };

        tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            _ = time::sleep(capped) => Ok(()),
        }
    }

    /// Run `future` under this context, mapping cancellation and deadline
    /// expiry to the matching error.
    pub async fn run<F, T>(&self, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check()?;

        match self.remaining() {
            Some(remaining) => {
                tokio::select! {
                    _ = self.cancel.cancelled() => Err(Error::Cancelled),
                    outcome = time::timeout(remaining, future) => match outcome {
                        Ok(result) => result,
                        Err(_) => Err(Error::Timeout),
                    },
                }
            }
            None => {
                tokio::select! {
                    _ = self.cancel.cancelled() => Err(Error::Cancelled),
                    result = future => result,
                }
            }
        }
    }
}
