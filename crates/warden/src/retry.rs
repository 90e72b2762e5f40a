//! Bounded retry for whole enumeration steps.
//!
//! Rate limiting never reaches this layer (the transport absorbs it); what
//! gets retried here are transient failures of a larger unit of work, such as
//! listing one organization's repositories.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};

/// Total attempts (first try included) for a retried enumeration step.
pub const MAX_ATTEMPTS: usize = 5;

/// Configuration for retry operations.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Minimum delay between attempts.
    pub min_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Total number of attempts, including the first.
    pub max_attempts: usize,
    /// Whether to add jitter to delays.
    pub with_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: MAX_ATTEMPTS,
            with_jitter: true,
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn new(min_delay: Duration, max_delay: Duration, max_attempts: usize) -> Self {
        Self {
            min_delay,
            max_delay,
            max_attempts,
            with_jitter: true,
        }
    }

    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.with_jitter = jitter;
        self
    }

    /// Build an exponential backoff strategy from this configuration.
    #[must_use]
    pub fn into_backoff(self) -> ExponentialBuilder {
        // backon counts retries, not attempts.
        let mut builder = ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_attempts.saturating_sub(1));

        if self.with_jitter {
            builder = builder.with_jitter();
        }

        builder
    }
}

/// Run `operation` until it succeeds, `is_retryable` rejects the error, or the
/// attempts in `config` are used up.
///
/// Every failed attempt that will be retried is logged as `attempt i/n failed`
/// under `target` (for example the organization being enumerated). The final
/// error is returned to the caller, who decides how loudly to report it.
pub async fn with_retry<T, E, F, Fut, IsRetryable, ShortMsg>(
    mut operation: F,
    config: RetryConfig,
    is_retryable: IsRetryable,
    short_message: ShortMsg,
    target: &str,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    IsRetryable: Fn(&E) -> bool,
    ShortMsg: Fn(&E) -> String,
{
    let max_attempts = config.max_attempts;
    let attempt = AtomicUsize::new(0);

    let retry_op = || {
        attempt.fetch_add(1, Ordering::SeqCst);
        operation()
    };

    retry_op
        .retry(config.into_backoff())
        .notify(|err, dur| {
            let current_attempt = attempt.load(Ordering::SeqCst);
            tracing::warn!(
                target_name = %target,
                retry_in = ?dur,
                "attempt {}/{} failed: {}",
                current_attempt,
                max_attempts,
                short_message(err)
            );
        })
        .when(is_retryable)
        .await
}
