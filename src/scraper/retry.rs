//! Bounded retry for a single acquisition strategy.
//!
//! Transient failures (timeouts, connection errors, 5xx) and 429 responses draw
//! from separate budgets: a 429 means the whole monitor should slow down, so it
//! gets its own, longer backoff and reports the delay to the caller.

use std::future::Future;
use std::time::Duration;

use crate::utils::error::FetchError;
use crate::utils::shutdown::ShutdownSignal;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first one for transient failures.
    pub retries: u32,
    pub backoff_base: Duration,
    pub rate_limit_retries: u32,
    pub rate_limit_backoff_base: Duration,
    pub rate_limit_max_backoff: Duration,
}

impl RetryPolicy {
    /// Single attempt, no retries of any kind.
    pub fn once() -> Self {
        Self {
            retries: 0,
            backoff_base: Duration::ZERO,
            rate_limit_retries: 0,
            rate_limit_backoff_base: Duration::ZERO,
            rate_limit_max_backoff: Duration::ZERO,
        }
    }

    /// `base * 2^attempt`, saturating.
    pub fn transient_delay(&self, attempt: u32) -> Duration {
        exponential(self.backoff_base, attempt)
    }

    /// Server-provided `Retry-After` wins; otherwise exponential, always capped.
    pub fn rate_limit_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        retry_after
            .unwrap_or_else(|| exponential(self.rate_limit_backoff_base, attempt))
            .min(self.rate_limit_max_backoff)
    }
}

fn exponential(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1u32 << attempt.min(20))
}

/// Runs `operation` until it succeeds, fails non-retriably, or a budget runs out.
///
/// `on_rate_limit` is told the backoff for every 429, including the one that
/// exhausts the budget, before any sleep starts. All sleeps
/// end early with [`FetchError::Cancelled`] once shutdown is signalled.
pub(crate) async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    shutdown: &ShutdownSignal,
    strategy: &str,
    on_rate_limit: impl Fn(Duration),
    mut operation: F,
) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut transient_attempt = 0u32;
    let mut rate_limit_attempt = 0u32;

    loop {
        if shutdown.is_triggered() {
            return Err(FetchError::Cancelled);
        }

        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        let delay = if let FetchError::RateLimited { retry_after, .. } = &err {
            let delay = policy.rate_limit_delay(rate_limit_attempt, *retry_after);
            // Reported even when the budget is spent.
            on_rate_limit(delay);
            if rate_limit_attempt >= policy.rate_limit_retries {
                tracing::warn!(strategy, attempts = rate_limit_attempt + 1, error = %err, "Rate limit retries exhausted");
                return Err(err);
            }
            rate_limit_attempt += 1;
            tracing::warn!(
                strategy,
                attempt = rate_limit_attempt,
                delay_ms = delay.as_millis() as u64,
                "Rate limited, backing off"
            );
            delay
        } else if err.is_transient() && transient_attempt < policy.retries {
            let delay = policy.transient_delay(transient_attempt);
            transient_attempt += 1;
            tracing::debug!(
                strategy,
                attempt = transient_attempt,
                max_retries = policy.retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Transient fetch error, retrying"
            );
            delay
        } else {
            return Err(err);
        };

        shutdown.sleep(delay).await?;
    }
}
