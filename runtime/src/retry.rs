//! Retry policy with exponential backoff for handling transient failures.
//!
//! [`RetryPolicy`] re-runs an outcome-producing operation until it succeeds,
//! the attempt budget is spent, a filter declares the failure not retryable,
//! or the context is cancelled. The final outcome records the number of
//! attempts under [`keys::ATTEMPTS`].
//!
//! Panics raised by the operation are caught per attempt and offered to the
//! panic filter; failures returned by the operation are offered to the result
//! filter. Both filters default to "retry everything".
//!
//! # Example
//!
//! ```rust,ignore
//! use courier_runtime::policy::Policy;
//! use courier_runtime::retry::RetryPolicy;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::builder()
//!     .max_attempts(5)
//!     .initial_delay(Duration::from_millis(100))
//!     .max_delay(Duration::from_secs(10))
//!     .multiplier(2.0)
//!     .retry_if(|reasons| !reasons.any(Reason::is_handler_not_found))
//!     .build();
//!
//! let outcome = policy
//!     .execute(ctx, |ctx| async move { inventory.reserve(&ctx).await })
//!     .await;
//! println!("took {:?} attempts", outcome.attempts());
//! ```

use crate::metrics::RetryMetrics;
use crate::policy::Policy;
use courier_core::context::Context;
use courier_core::outcome::{CaughtPanic, Outcome, Reason, Reasons, keys};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

type ResultFilter = Arc<dyn Fn(&Reasons) -> bool + Send + Sync>;
type PanicFilter = Arc<dyn Fn(&CaughtPanic) -> bool + Send + Sync>;

/// Value written under [`keys::RETRY_STOPPED`] when a filter rejects a failure.
pub const NOT_RETRYABLE: &str = "not_retryable";

/// Retry policy configuration for exponential backoff.
///
/// # Default Values
///
/// - `max_attempts`: 3
/// - `initial_delay`: 100ms
/// - `max_delay`: 30 seconds
/// - `multiplier`: 2.0 (delay doubles each retry)
/// - `jitter`: enabled
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter: bool,
    result_filter: Option<ResultFilter>,
    panic_filter: Option<PanicFilter>,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("multiplier", &self.multiplier)
            .field("jitter", &self.jitter)
            .field("result_filter", &self.result_filter.is_some())
            .field("panic_filter", &self.panic_filter.is_some())
            .finish()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryPolicy {
    /// Default backoff with the given attempt budget.
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self::builder().max_attempts(max_attempts).build()
    }

    /// Create a new policy builder.
    #[must_use]
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::default()
    }

    /// Maximum number of attempts, the first one included.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Calculate the delay before retry number `attempt` (0-based).
    ///
    /// `delay = min(initial_delay * multiplier^attempt, max_delay)`, then
    /// multiplied by a random factor in `0.5..=1.0` when jitter is enabled.
    /// A delay that does not fit a [`Duration`] saturates to `max_delay`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        use rand::Rng;

        #[allow(clippy::cast_possible_wrap)]
        let base_secs = self.initial_delay.as_secs_f64()
            * self.multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let capped_secs = base_secs.min(self.max_delay.as_secs_f64());

        let final_secs = if self.jitter {
            capped_secs * rand::thread_rng().gen_range(0.5..=1.0)
        } else {
            capped_secs
        };

        Duration::try_from_secs_f64(final_secs).unwrap_or(self.max_delay)
    }

    /// Without a filter every failure is retried except one that is already
    /// a cancellation.
    fn should_retry_failure(&self, reasons: &Reasons) -> bool {
        match &self.result_filter {
            Some(filter) => filter(reasons),
            None => !reasons.any(Reason::is_cancelled),
        }
    }

    fn should_retry_panic(&self, panic: &CaughtPanic) -> bool {
        self.panic_filter.as_ref().is_none_or(|filter| filter(panic))
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Clone, Default)]
pub struct RetryPolicyBuilder {
    max_attempts: Option<u32>,
    initial_delay: Option<Duration>,
    max_delay: Option<Duration>,
    multiplier: Option<f64>,
    jitter: Option<bool>,
    result_filter: Option<ResultFilter>,
    panic_filter: Option<PanicFilter>,
}

impl RetryPolicyBuilder {
    /// Set the maximum number of attempts (values below 1 are raised to 1).
    #[must_use]
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Set initial delay before first retry.
    #[must_use]
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    /// Set maximum delay (cap for exponential backoff).
    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Set multiplier for exponential backoff.
    ///
    /// Values below 1.0 are raised to 1.0; NaN and infinities fall back to
    /// the default of 2.0.
    #[must_use]
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Enable or disable random jitter on the backoff delay.
    #[must_use]
    pub fn jitter(mut self, jitter: bool) -> Self {
        self.jitter = Some(jitter);
        self
    }

    /// Retry a failure only when `filter` returns `true` for its reasons.
    #[must_use]
    pub fn retry_if(mut self, filter: impl Fn(&Reasons) -> bool + Send + Sync + 'static) -> Self {
        self.result_filter = Some(Arc::new(filter));
        self
    }

    /// Retry a caught panic only when `filter` returns `true`.
    #[must_use]
    pub fn retry_panics_if(
        mut self,
        filter: impl Fn(&CaughtPanic) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.panic_filter = Some(Arc::new(filter));
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.unwrap_or(3).max(1),
            initial_delay: self.initial_delay.unwrap_or(Duration::from_millis(100)),
            max_delay: self.max_delay.unwrap_or(Duration::from_secs(30)),
            multiplier: self
                .multiplier
                .filter(|multiplier| multiplier.is_finite())
                .unwrap_or(2.0)
                .max(1.0),
            jitter: self.jitter.unwrap_or(true),
            result_filter: self.result_filter,
            panic_filter: self.panic_filter,
        }
    }
}

impl Policy for RetryPolicy {
    fn execute<'a, T, F, Fut>(&'a self, ctx: Context, operation: F) -> BoxFuture<'a, Outcome<T>>
    where
        F: Fn(Context) -> Fut + Send + Sync + 'a,
        Fut: Future<Output = Outcome<T>> + Send + 'a,
        T: Send + 'a,
    {
        Box::pin(async move {
            if let Err(reason) = ctx.ensure_active() {
                return Outcome::failure(reason).with_metadata(keys::ATTEMPTS, 0_u32);
            }

            let mut attempt: u32 = 0;
            loop {
                attempt += 1;
                RetryMetrics::record_attempt();

                let attempt_future = async { operation(ctx.clone()).await };
                let (outcome, retryable) =
                    match AssertUnwindSafe(attempt_future).catch_unwind().await {
                        Ok(outcome) => {
                            let retryable = outcome
                                .reasons()
                                .is_some_and(|reasons| self.should_retry_failure(reasons));
                            (outcome, retryable)
                        }
                        Err(payload) => {
                            let panic = CaughtPanic::from_payload(&*payload);
                            tracing::warn!(attempt, panic = %panic, "Operation panicked");
                            let retryable = self.should_retry_panic(&panic);
                            (Outcome::failure(Reason::Panicked(panic)), retryable)
                        }
                    };

                let reasons = match outcome {
                    Outcome::Success { .. } => {
                        if attempt > 1 {
                            tracing::info!(attempt, "Operation succeeded after retry");
                            RetryMetrics::record_success();
                        }
                        return outcome.with_metadata(keys::ATTEMPTS, attempt);
                    }
                    Outcome::Failure { ref reasons, .. } => reasons.clone(),
                };

                if !retryable {
                    tracing::warn!(
                        attempt,
                        error = %reasons,
                        "Failure is not retryable, failing immediately"
                    );
                    RetryMetrics::record_not_retryable();
                    return outcome
                        .with_metadata(keys::ATTEMPTS, attempt)
                        .with_metadata(keys::RETRY_STOPPED, NOT_RETRYABLE);
                }

                if attempt >= self.max_attempts {
                    tracing::error!(
                        attempt,
                        error = %reasons,
                        "Operation failed after max attempts"
                    );
                    RetryMetrics::record_exhausted();
                    return outcome.with_metadata(keys::ATTEMPTS, attempt);
                }

                let delay = self.delay_for_attempt(attempt - 1);
                tracing::warn!(
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %reasons,
                    "Operation failed, retrying..."
                );

                tokio::select! {
                    biased;
                    () = ctx.cancelled() => {
                        tracing::debug!(attempt, "Retry abandoned: context cancelled");
                        let mut reasons = reasons;
                        if !reasons.any(Reason::is_cancelled) {
                            reasons.push(Reason::Cancelled);
                        }
                        return Outcome::<T>::from_reasons(reasons)
                            .with_metadata_from(outcome.metadata().clone())
                            .with_metadata(keys::ATTEMPTS, attempt);
                    }
                    () = tokio::time::sleep(delay) => {}
                }
            }
        })
    }
}
