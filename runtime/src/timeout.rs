//! Timeout policy.
//!
//! [`TimeoutPolicy`] races an operation against a deadline. The operation runs
//! with a child context; when the deadline passes, the child is cancelled, the
//! operation's future is dropped without being awaited, and the caller gets a
//! [`Reason::Timeout`] failure straight away.
//!
//! Completed operations keep their outcome and gain the measured wall-clock
//! time under [`keys::ELAPSED_MS`]. A panic inside the operation is caught and
//! reported as [`Reason::Panicked`] with the same metadata.

use crate::metrics::TimeoutMetrics;
use crate::policy::Policy;
use courier_core::context::Context;
use courier_core::outcome::{CaughtPanic, Outcome, Reason, keys};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::time::Instant;

/// Fails an operation that does not finish within `duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    duration: Duration,
}

impl TimeoutPolicy {
    /// A deadline of `duration` per execution.
    #[must_use]
    pub const fn new(duration: Duration) -> Self {
        Self { duration }
    }

    /// The configured deadline.
    #[must_use]
    pub const fn duration(&self) -> Duration {
        self.duration
    }
}

fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

impl Policy for TimeoutPolicy {
    fn execute<'a, T, F, Fut>(&'a self, ctx: Context, operation: F) -> BoxFuture<'a, Outcome<T>>
    where
        F: Fn(Context) -> Fut + Send + Sync + 'a,
        Fut: Future<Output = Outcome<T>> + Send + 'a,
        T: Send + 'a,
    {
        Box::pin(async move {
            let attempt_ctx = ctx.child();
            let started = Instant::now();

            let guarded = AssertUnwindSafe(operation(attempt_ctx.clone())).catch_unwind();

            match tokio::time::timeout(self.duration, guarded).await {
                Ok(Ok(outcome)) => {
                    let elapsed = started.elapsed();
                    TimeoutMetrics::record_completed(elapsed);
                    outcome.with_metadata(keys::ELAPSED_MS, millis(elapsed))
                }
                Ok(Err(payload)) => {
                    attempt_ctx.cancel();
                    let elapsed = started.elapsed();
                    let panic = CaughtPanic::from_payload(&*payload);
                    tracing::error!(
                        correlation_id = %ctx.correlation_id(),
                        elapsed_ms = millis(elapsed),
                        panic = %panic,
                        "Operation panicked before its deadline"
                    );
                    TimeoutMetrics::record_completed(elapsed);
                    Outcome::failure(Reason::Panicked(panic))
                        .with_metadata(keys::ELAPSED_MS, millis(elapsed))
                }
                Err(_) => {
                    attempt_ctx.cancel();
                    let elapsed = started.elapsed();
                    tracing::warn!(
                        correlation_id = %ctx.correlation_id(),
                        deadline_ms = millis(self.duration),
                        elapsed_ms = millis(elapsed),
                        "Operation timed out"
                    );
                    TimeoutMetrics::record_expired();
                    Outcome::failure(Reason::Timeout {
                        after: self.duration,
                    })
                    .with_metadata(keys::ELAPSED_MS, millis(elapsed))
                }
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test(start_paused = true)]
    async fn completes_within_deadline() {
        let policy = TimeoutPolicy::new(Duration::from_millis(100));

        let outcome = policy
            .execute(Context::root(), |_ctx: Context| async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Outcome::success("done")
            })
            .await;

        assert_eq!(outcome.value(), Some(&"done"));
        assert!(
            outcome
                .elapsed()
                .is_some_and(|elapsed| elapsed >= Duration::from_millis(20))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn fails_at_the_deadline() {
        let policy = TimeoutPolicy::new(Duration::from_millis(100));
        let started = Instant::now();

        let outcome: Outcome<()> = policy
            .execute(Context::root(), |_ctx: Context| async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Outcome::success(())
            })
            .await;

        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(100));
        assert!(waited < Duration::from_millis(200));
        assert!(matches!(
            outcome.failure_reasons(),
            [Reason::Timeout { after }] if *after == Duration::from_millis(100)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_cancels_the_attempt_context_only() {
        let policy = TimeoutPolicy::new(Duration::from_millis(10));
        let ctx = Context::root();
        let attempt_slot: Arc<Mutex<Option<Context>>> = Arc::new(Mutex::new(None));

        let _: Outcome<()> = policy
            .execute(ctx.clone(), |attempt: Context| {
                let slot = Arc::clone(&attempt_slot);
                async move {
                    if let Ok(mut slot) = slot.lock() {
                        *slot = Some(attempt.clone());
                    }
                    attempt.cancelled().await;
                    Outcome::success(())
                }
            })
            .await;

        let attempt = attempt_slot.lock().ok().and_then(|slot| slot.clone());
        assert!(attempt.is_some_and(|attempt| attempt.is_cancelled()));
        assert!(!ctx.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_operation_becomes_a_failure() {
        let policy = TimeoutPolicy::new(Duration::from_millis(100));

        let outcome: Outcome<u32> = policy
            .execute(Context::root(), |_ctx: Context| async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                if true {
                    panic!("ledger corrupted");
                }
                Outcome::success(7)
            })
            .await;

        assert!(outcome.is_failure());
        assert!(matches!(
            outcome.failure_reasons(),
            [Reason::Panicked(panic)] if panic.to_string().contains("ledger corrupted")
        ));
        assert!(
            outcome
                .elapsed()
                .is_some_and(|elapsed| elapsed >= Duration::from_millis(5))
        );
    }
}
