//! Event publishing.
//!
//! [`Publisher::publish`] routes an event one of two ways per call:
//!
//! - [`PublishMode::Local`] resolves every registered handler and runs them
//!   through the configured [`Orchestration`]. Zero handlers is success.
//! - [`PublishMode::Outbox`] stages the event through the configured
//!   [`Outbox`] and returns once the record is persisted. No local handler
//!   runs.
//!
//! The modes never mix. A caller that needs both publishes twice.
//!
//! # Example
//!
//! ```rust,ignore
//! let publisher = Publisher::new(registry)
//!     .with_orchestration(OrchestrationStrategy::Sequential.into())
//!     .with_outbox(Outbox::new(store));
//!
//! publisher.publish(inventory_checked, &ctx, PublishMode::Local).await;
//! publisher.publish(order_created, &ctx, PublishMode::Outbox).await;
//! ```

use crate::metrics::PublishMetrics;
use crate::orchestrator::{EventOrchestrator, Orchestration};
use crate::outbox::Outbox;
use courier_core::codec::{BincodeCodec, Codec};
use courier_core::context::Context;
use courier_core::event::Event;
use courier_core::outbox::OutboxStore;
use courier_core::outcome::{Outcome, Reason};
use courier_core::resolver::DependencyResolver;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::Instant;

/// Where a published event goes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishMode {
    /// Run local handlers now.
    #[default]
    Local,
    /// Stage for external delivery by the relay.
    Outbox,
}

/// Publishes events to local handlers or to the outbox.
pub struct Publisher<D, S: OutboxStore + ?Sized = dyn OutboxStore, C = BincodeCodec> {
    resolver: D,
    orchestration: Orchestration,
    outbox: Option<Outbox<S, C>>,
}

impl<D: DependencyResolver> Publisher<D> {
    /// A publisher with the default orchestration and no outbox.
    #[must_use]
    pub fn new(resolver: D) -> Self {
        Self {
            resolver,
            orchestration: Orchestration::default(),
            outbox: None,
        }
    }
}

impl<D: DependencyResolver, S: OutboxStore + ?Sized, C: Codec> Publisher<D, S, C> {
    /// Fan local events out with `orchestration`.
    #[must_use]
    pub fn with_orchestration(mut self, orchestration: Orchestration) -> Self {
        self.orchestration = orchestration;
        self
    }

    /// Enable [`PublishMode::Outbox`] through `outbox`.
    #[must_use]
    pub fn with_outbox<S2, C2>(self, outbox: Outbox<S2, C2>) -> Publisher<D, S2, C2>
    where
        S2: OutboxStore + ?Sized,
        C2: Codec,
    {
        Publisher {
            resolver: self.resolver,
            orchestration: self.orchestration,
            outbox: Some(outbox),
        }
    }

    /// The resolver handlers are looked up in.
    #[must_use]
    pub const fn resolver(&self) -> &D {
        &self.resolver
    }

    /// The configured orchestration.
    #[must_use]
    pub const fn orchestration(&self) -> Orchestration {
        self.orchestration
    }

    /// The configured outbox, if any.
    #[must_use]
    pub const fn outbox(&self) -> Option<&Outbox<S, C>> {
        self.outbox.as_ref()
    }

    /// Publish `event` in `mode`.
    pub async fn publish<E>(&self, event: E, ctx: &Context, mode: PublishMode) -> Outcome<()>
    where
        E: Event + Serialize,
    {
        match mode {
            PublishMode::Local => self.publish_local(Arc::new(event), ctx).await,
            PublishMode::Outbox => self.stage(&event, ctx).await,
        }
    }

    /// Run every local handler registered for the event.
    ///
    /// Takes the event by `Arc` so concurrent handlers can share it without
    /// cloning the payload.
    pub async fn publish_local<E: Event>(&self, event: Arc<E>, ctx: &Context) -> Outcome<()> {
        if let Err(reason) = ctx.ensure_active() {
            return Outcome::failure(reason);
        }

        let event_type = event.event_type();
        let handlers = self.resolver.resolve_all::<E>();
        if handlers.is_empty() {
            tracing::trace!(event_type, "No handlers registered for event");
            return Outcome::success(());
        }

        let count = handlers.len();
        let started = Instant::now();
        tracing::debug!(
            event_type,
            handlers = count,
            strategy = ?self.orchestration.strategy(),
            correlation_id = %ctx.correlation_id(),
            "Publishing event"
        );

        let outcome = self.orchestration.run(ctx, handlers, event).await;

        PublishMetrics::record_publish(event_type, count, started.elapsed());
        if let Some(reasons) = outcome.reasons() {
            PublishMetrics::record_handler_failures(event_type, reasons.count());
            tracing::warn!(
                event_type,
                failures = reasons.count(),
                correlation_id = %ctx.correlation_id(),
                error = %reasons,
                "Event handlers failed"
            );
        }
        outcome
    }

    async fn stage<E: Event + Serialize>(&self, event: &E, ctx: &Context) -> Outcome<()> {
        let Some(outbox) = &self.outbox else {
            tracing::error!(
                event_type = event.event_type(),
                "Outbox publish requested but no outbox is configured"
            );
            return Outcome::failure(Reason::infrastructure("outbox", "no outbox configured"));
        };
        outbox.add(event, ctx).await.discard()
    }
}

impl<D: Clone, S: OutboxStore + ?Sized, C: Clone> Clone for Publisher<D, S, C> {
    fn clone(&self) -> Self {
        Self {
            resolver: self.resolver.clone(),
            orchestration: self.orchestration,
            outbox: self.outbox.clone(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use courier_core::handler::FnEventHandler;
    use courier_core::resolver::HandlerRegistry;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Debug, Serialize, Deserialize)]
    struct Pinged {
        n: u32,
    }

    impl Event for Pinged {
        fn event_type(&self) -> &'static str {
            "Pinged.v1"
        }
    }

    #[tokio::test]
    async fn zero_handlers_is_success() {
        let publisher = Publisher::new(HandlerRegistry::default());

        let outcome = publisher
            .publish(Pinged { n: 1 }, &Context::root(), PublishMode::Local)
            .await;

        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn local_mode_runs_every_handler() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = |seen: &Arc<AtomicUsize>| {
            let seen = Arc::clone(seen);
            FnEventHandler::new("counter", move |event: Pinged, _ctx: Context| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.fetch_add(event.n as usize, Ordering::SeqCst);
                    Outcome::success(())
                }
            })
        };
        let registry = HandlerRegistry::builder()
            .event::<Pinged>(counter(&seen))
            .event::<Pinged>(counter(&seen))
            .build()
            .unwrap();
        let publisher = Publisher::new(registry);

        let outcome = publisher
            .publish(Pinged { n: 2 }, &Context::root(), PublishMode::Local)
            .await;

        assert!(outcome.is_success());
        assert_eq!(seen.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn outbox_mode_without_outbox_is_infrastructure_failure() {
        let publisher = Publisher::new(HandlerRegistry::default());

        let outcome = publisher
            .publish(Pinged { n: 1 }, &Context::root(), PublishMode::Outbox)
            .await;

        assert!(outcome.failure_reasons()[0].is_infrastructure());
    }

    #[test]
    fn local_is_the_default_mode() {
        assert_eq!(PublishMode::default(), PublishMode::Local);
    }
}
