//! Built-in pipeline behaviors.
//!
//! - [`TracingBehavior`] opens a span around the rest of the chain and logs the
//!   outcome with its duration.
//! - [`PolicyBehavior`] runs the rest of the chain under any resilience
//!   [`Policy`], so a retry or timeout can guard a single request type.

use crate::policy::Policy;
use courier_core::context::Context;
use courier_core::outcome::Outcome;
use courier_core::pipeline::{Next, PipelineBehavior};
use courier_core::request::{Request, request_name};
use futures::future::BoxFuture;
use tokio::time::Instant;
use tracing::Instrument;

/// Logs every request passing through the pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingBehavior;

impl TracingBehavior {
    /// Create the behavior.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl<R: Request> PipelineBehavior<R> for TracingBehavior {
    fn handle<'a>(
        &'a self,
        request: R,
        ctx: &'a Context,
        next: Next<R>,
    ) -> BoxFuture<'a, Outcome<R::Response>> {
        let message_type = request_name::<R>();
        let span = tracing::info_span!(
            "courier_pipeline",
            message_type,
            correlation_id = %ctx.correlation_id(),
        );

        Box::pin(
            async move {
                tracing::trace!("Entering pipeline");
                let started = Instant::now();
                let outcome = next.run(request, ctx).await;
                let elapsed_ms = started.elapsed().as_millis();

                match outcome.reasons() {
                    None => tracing::debug!(elapsed_ms, "Request succeeded"),
                    Some(reasons) => tracing::warn!(
                        elapsed_ms,
                        failures = reasons.count(),
                        error = %reasons,
                        "Request failed"
                    ),
                }
                outcome
            }
            .instrument(span),
        )
    }
}

/// Runs the rest of the chain under a [`Policy`].
///
/// The request is cloned for every attempt, so the request type must be
/// `Clone`.
///
/// # Example
///
/// ```ignore
/// let pipeline = PipelineBuilder::<ChargeCard>::new()
///     .behavior(PolicyBehavior::new(
///         RetryPolicy::new(3).wrap(TimeoutPolicy::new(Duration::from_secs(2))),
///     ))
///     .handler(ChargeCardHandler::new(gateway));
/// ```
#[derive(Debug, Clone)]
pub struct PolicyBehavior<P> {
    policy: P,
}

impl<P: Policy> PolicyBehavior<P> {
    /// Wrap `policy`.
    #[must_use]
    pub const fn new(policy: P) -> Self {
        Self { policy }
    }

    /// The wrapped policy.
    #[must_use]
    pub const fn policy(&self) -> &P {
        &self.policy
    }
}

impl<R, P> PipelineBehavior<R> for PolicyBehavior<P>
where
    R: Request + Clone + Sync,
    P: Policy + 'static,
{
    fn handle<'a>(
        &'a self,
        request: R,
        ctx: &'a Context,
        next: Next<R>,
    ) -> BoxFuture<'a, Outcome<R::Response>> {
        self.policy.execute(ctx.clone(), move |ctx: Context| {
            let next = next.clone();
            let request = request.clone();
            async move { next.run(request, &ctx).await }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use crate::timeout::TimeoutPolicy;
    use courier_core::handler::{FnRequestHandler, RequestHandler};
    use courier_core::outcome::{Reason, keys};
    use courier_core::pipeline::PipelineBuilder;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[derive(Clone)]
    struct Charge {
        cents: u64,
    }

    impl Request for Charge {
        type Response = u64;
    }

    fn flaky(fail_first: u32, calls: &Arc<AtomicU32>) -> impl RequestHandler<Charge> {
        let calls = Arc::clone(calls);
        FnRequestHandler::new(move |request: Charge, _ctx: Context| {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(if call < fail_first {
                Outcome::failure(Reason::rejected("gateway busy"))
            } else {
                Outcome::success(request.cents)
            })
        })
    }

    #[tokio::test(start_paused = true)]
    async fn retry_behavior_reinvokes_the_rest_of_the_chain() {
        let calls = Arc::new(AtomicU32::new(0));
        let pipeline = PipelineBuilder::<Charge>::new()
            .behavior(TracingBehavior::new())
            .behavior(PolicyBehavior::new(
                RetryPolicy::builder()
                    .max_attempts(3)
                    .initial_delay(Duration::from_millis(10))
                    .jitter(false)
                    .build(),
            ))
            .handler(flaky(2, &calls));

        let outcome = pipeline.handle(Charge { cents: 250 }, &Context::root()).await;

        assert_eq!(outcome.value(), Some(&250));
        assert_eq!(outcome.attempts(), Some(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_behavior_bounds_the_handler() {
        let pipeline = PipelineBuilder::<Charge>::new()
            .behavior(PolicyBehavior::new(TimeoutPolicy::new(Duration::from_millis(20))))
            .handler(FnRequestHandler::new(|request: Charge, _ctx: Context| async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Outcome::success(request.cents)
            }));

        let outcome = pipeline.handle(Charge { cents: 1 }, &Context::root()).await;

        assert!(outcome.failure_reasons()[0].is_timeout());
        assert!(outcome.metadata().get(keys::ELAPSED_MS).is_some());
    }
}
