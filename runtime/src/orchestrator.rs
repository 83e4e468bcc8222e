//! Event fan-out strategies.
//!
//! An orchestrator receives every handler registered for one event type and
//! turns their individual outcomes into one. Both strategies run every handler
//! (a failing handler never stops its siblings) and keep every failure reason
//! via [`Outcome::merge`]; they differ only in scheduling.
//!
//! | Strategy                   | Scheduling                          | Reason order       |
//! |----------------------------|-------------------------------------|--------------------|
//! | [`SequentialOrchestrator`] | one after another, in registration  | registration order |
//! | [`ConcurrentOrchestrator`] | one task per handler, all joined    | unspecified        |
//!
//! A panicking handler becomes a [`Reason::Panicked`] for that handler only.

use crate::metrics::DispatchMetrics;
use courier_core::context::Context;
use courier_core::event::Event;
use courier_core::handler::EventHandler;
use courier_core::outcome::{CaughtPanic, Outcome, Reason};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinSet;

/// Runs the handlers of one event and aggregates their outcomes.
pub trait EventOrchestrator: Send + Sync {
    /// Invoke every handler with `event` and merge the outcomes.
    fn run<'a, E: Event>(
        &'a self,
        ctx: &'a Context,
        handlers: Vec<Arc<dyn EventHandler<E>>>,
        event: Arc<E>,
    ) -> BoxFuture<'a, Outcome<()>>;
}

/// Invoke one handler, converting a panic into a failure reason.
async fn invoke_guarded<E: Event>(
    handler: &dyn EventHandler<E>,
    event: &E,
    ctx: &Context,
) -> Outcome<()> {
    let outcome = match AssertUnwindSafe(async { handler.handle(event, ctx).await })
        .catch_unwind()
        .await
    {
        Ok(outcome) => outcome,
        Err(payload) => {
            let panic = CaughtPanic::from_payload(&*payload);
            tracing::error!(
                handler = handler.name(),
                event_type = event.event_type(),
                correlation_id = %ctx.correlation_id(),
                panic = %panic,
                "Event handler panicked"
            );
            DispatchMetrics::record_panic();
            return Outcome::failure(Reason::Panicked(panic));
        }
    };

    if let Some(reasons) = outcome.reasons() {
        tracing::warn!(
            handler = handler.name(),
            event_type = event.event_type(),
            correlation_id = %ctx.correlation_id(),
            error = %reasons,
            "Event handler failed"
        );
    }
    outcome
}

/// Runs handlers one at a time, in registration order.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialOrchestrator;

impl EventOrchestrator for SequentialOrchestrator {
    fn run<'a, E: Event>(
        &'a self,
        ctx: &'a Context,
        handlers: Vec<Arc<dyn EventHandler<E>>>,
        event: Arc<E>,
    ) -> BoxFuture<'a, Outcome<()>> {
        Box::pin(async move {
            let mut outcomes = Vec::with_capacity(handlers.len());
            for handler in &handlers {
                tracing::trace!(handler = handler.name(), "Invoking event handler");
                outcomes.push(invoke_guarded(handler.as_ref(), event.as_ref(), ctx).await);
            }
            Outcome::merge(outcomes)
        })
    }
}

/// Runs every handler as its own task and joins them all.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConcurrentOrchestrator;

impl EventOrchestrator for ConcurrentOrchestrator {
    fn run<'a, E: Event>(
        &'a self,
        ctx: &'a Context,
        handlers: Vec<Arc<dyn EventHandler<E>>>,
        event: Arc<E>,
    ) -> BoxFuture<'a, Outcome<()>> {
        Box::pin(async move {
            let mut tasks = JoinSet::new();
            for handler in handlers {
                let event = Arc::clone(&event);
                let ctx = ctx.clone();
                tasks.spawn(async move {
                    invoke_guarded(handler.as_ref(), event.as_ref(), &ctx).await
                });
            }

            let mut outcomes = Vec::with_capacity(tasks.len());
            while let Some(joined) = tasks.join_next().await {
                outcomes.push(match joined {
                    Ok(outcome) => outcome,
                    Err(error) if error.is_panic() => {
                        DispatchMetrics::record_panic();
                        let panic = CaughtPanic::from_payload(&*error.into_panic());
                        Outcome::failure(Reason::Panicked(panic))
                    }
                    Err(error) => {
                        tracing::warn!(error = %error, "Event handler task did not complete");
                        Outcome::failure(Reason::Cancelled)
                    }
                });
            }
            Outcome::merge(outcomes)
        })
    }
}

/// Fan-out strategy selected in configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestrationStrategy {
    /// Registration order, one at a time.
    Sequential,
    /// All handlers at once.
    #[default]
    Concurrent,
}

/// Runtime orchestrator chosen from an [`OrchestrationStrategy`].
#[derive(Debug, Clone, Copy)]
pub enum Orchestration {
    /// See [`SequentialOrchestrator`].
    Sequential(SequentialOrchestrator),
    /// See [`ConcurrentOrchestrator`].
    Concurrent(ConcurrentOrchestrator),
}

impl Default for Orchestration {
    fn default() -> Self {
        OrchestrationStrategy::default().into()
    }
}

impl From<OrchestrationStrategy> for Orchestration {
    fn from(strategy: OrchestrationStrategy) -> Self {
        match strategy {
            OrchestrationStrategy::Sequential => Self::Sequential(SequentialOrchestrator),
            OrchestrationStrategy::Concurrent => Self::Concurrent(ConcurrentOrchestrator),
        }
    }
}

impl Orchestration {
    /// The strategy this orchestrator implements.
    #[must_use]
    pub const fn strategy(&self) -> OrchestrationStrategy {
        match self {
            Self::Sequential(_) => OrchestrationStrategy::Sequential,
            Self::Concurrent(_) => OrchestrationStrategy::Concurrent,
        }
    }
}

impl EventOrchestrator for Orchestration {
    fn run<'a, E: Event>(
        &'a self,
        ctx: &'a Context,
        handlers: Vec<Arc<dyn EventHandler<E>>>,
        event: Arc<E>,
    ) -> BoxFuture<'a, Outcome<()>> {
        match self {
            Self::Sequential(orchestrator) => orchestrator.run(ctx, handlers, event),
            Self::Concurrent(orchestrator) => orchestrator.run(ctx, handlers, event),
        }
    }
}
