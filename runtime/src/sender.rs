//! Request dispatch.
//!
//! [`Sender::send`] resolves the single handler registered for a request type
//! and invokes it. Registered pipelines are themselves handlers, so behaviors
//! wrap the call without the sender knowing about them.
//!
//! The sender never panics and never retries:
//! - no handler: failure with [`Reason::HandlerNotFound`];
//! - context already cancelled: failure with [`Reason::Cancelled`], handler not
//!   invoked;
//! - handler or behavior panics: failure with [`Reason::Panicked`].

use crate::metrics::DispatchMetrics;
use courier_core::context::Context;
use courier_core::outcome::{CaughtPanic, Outcome, Reason};
use courier_core::request::Request;
use courier_core::resolver::DependencyResolver;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use tokio::time::Instant;
use tracing::Instrument;

/// Dispatches requests to their single handler.
///
/// Stateless apart from the resolver; clone it freely or share it behind an
/// `Arc`.
#[derive(Debug, Clone)]
pub struct Sender<D> {
    resolver: D,
}

impl<D: DependencyResolver> Sender<D> {
    /// Create a sender over a resolver.
    #[must_use]
    pub const fn new(resolver: D) -> Self {
        Self { resolver }
    }

    /// The resolver handlers are looked up in.
    #[must_use]
    pub const fn resolver(&self) -> &D {
        &self.resolver
    }

    /// Dispatch `request` to its handler.
    pub async fn send<R: Request>(&self, request: R, ctx: &Context) -> Outcome<R::Response> {
        let message_type = std::any::type_name::<R>();
        let span = tracing::debug_span!(
            "courier_send",
            message_type,
            correlation_id = %ctx.correlation_id(),
        );

        async move {
            if let Err(reason) = ctx.ensure_active() {
                tracing::debug!("Request cancelled before dispatch");
                return Outcome::failure(reason);
            }

            let Some(handler) = self.resolver.try_resolve::<R>() else {
                tracing::warn!("No handler registered for request");
                DispatchMetrics::record_handler_not_found(message_type);
                return Outcome::failure(Reason::HandlerNotFound { message_type });
            };

            let started = Instant::now();
            let outcome = match AssertUnwindSafe(async { handler.handle(request, ctx).await })
                .catch_unwind()
                .await
            {
                Ok(outcome) => outcome,
                Err(payload) => {
                    let panic = CaughtPanic::from_payload(&*payload);
                    tracing::error!(panic = %panic, "Request handler panicked");
                    DispatchMetrics::record_panic();
                    Outcome::failure(Reason::Panicked(panic))
                }
            };

            let elapsed = started.elapsed();
            DispatchMetrics::record_request(message_type, outcome.is_success(), elapsed);
            match outcome.reasons() {
                None => tracing::debug!(elapsed_ms = elapsed.as_millis(), "Request handled"),
                Some(reasons) => tracing::debug!(
                    elapsed_ms = elapsed.as_millis(),
                    error = %reasons,
                    "Request failed"
                ),
            }
            outcome
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use courier_core::handler::FnRequestHandler;
    use courier_core::resolver::HandlerRegistry;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Add(u32, u32);

    impl Request for Add {
        type Response = u32;
    }

    struct Missing;

    impl Request for Missing {
        type Response = ();
    }

    struct Explode;

    impl Request for Explode {
        type Response = ();
    }

    fn sender(calls: &Arc<AtomicUsize>) -> Sender<HandlerRegistry> {
        let calls = Arc::clone(calls);
        let registry = HandlerRegistry::builder()
            .request::<Add>(FnRequestHandler::new(move |request: Add, _ctx: Context| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Outcome::success(request.0 + request.1) }
            }))
            .request::<Explode>(FnRequestHandler::new(|_request: Explode, _ctx: Context| async {
                if true {
                    panic!("kaboom");
                }
                Outcome::success(())
            }))
            .build()
            .unwrap();
        Sender::new(registry)
    }

    #[tokio::test]
    async fn invokes_the_handler_exactly_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let sender = sender(&calls);

        let outcome = sender.send(Add(2, 3), &Context::root()).await;

        assert_eq!(outcome.into_value(), Some(5));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_handler_is_a_failure_not_a_panic() {
        let sender = sender(&Arc::new(AtomicUsize::new(0)));

        let outcome = sender.send(Missing, &Context::root()).await;

        assert!(matches!(
            outcome.failure_reasons(),
            [Reason::HandlerNotFound { message_type }] if message_type.ends_with("Missing")
        ));
    }

    #[tokio::test]
    async fn cancelled_context_skips_the_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let sender = sender(&calls);
        let ctx = Context::root();
        ctx.cancel();

        let outcome = sender.send(Add(1, 1), &ctx).await;

        assert!(outcome.failure_reasons()[0].is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn handler_panic_becomes_a_reason() {
        let sender = sender(&Arc::new(AtomicUsize::new(0)));

        let outcome = sender.send(Explode, &Context::root()).await;

        assert!(matches!(
            outcome.failure_reasons(),
            [Reason::Panicked(panic)] if panic.message() == "kaboom"
        ));
    }
}
