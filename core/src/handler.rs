//! Handler contracts.
//!
//! Handlers are async, receive the dispatch [`Context`] and always produce an
//! [`Outcome`]. They never panic or return errors by convention; a panic that
//! escapes anyway is caught by the dispatcher and turned into
//! [`Reason::Panicked`](crate::outcome::Reason::Panicked).
//!
//! The traits are dyn-compatible: each method returns a boxed future, so
//! handlers can be stored as `Arc<dyn RequestHandler<R>>` in a registry.

use crate::context::Context;
use crate::event::Event;
use crate::outcome::Outcome;
use crate::request::Request;
use futures::future::BoxFuture;
use std::future::Future;
use std::marker::PhantomData;

/// Handles one request type. Exactly one per request type is registered.
///
/// # Example
///
/// ```ignore
/// struct CreateOrderHandler;
///
/// impl RequestHandler<CreateOrder> for CreateOrderHandler {
///     fn handle<'a>(
///         &'a self,
///         request: CreateOrder,
///         ctx: &'a Context,
///     ) -> BoxFuture<'a, Outcome<u64>> {
///         Box::pin(async move {
///             if request.amount == 0 {
///                 return Outcome::failure(Reason::rejected("empty order"));
///             }
///             Outcome::success(42)
///         })
///     }
/// }
/// ```
pub trait RequestHandler<R: Request>: Send + Sync + 'static {
    /// Handle the request.
    fn handle<'a>(&'a self, request: R, ctx: &'a Context) -> BoxFuture<'a, Outcome<R::Response>>;
}

/// Handles one event type. Zero or more per event type may be registered.
pub trait EventHandler<E: Event>: Send + Sync + 'static {
    /// Handle the event.
    fn handle<'a>(&'a self, event: &'a E, ctx: &'a Context) -> BoxFuture<'a, Outcome<()>>;

    /// Name used in logs when this handler fails.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Adapts an async closure into a [`RequestHandler`].
///
/// The closure receives an owned [`Context`] clone so the returned future does
/// not borrow from the dispatcher.
pub struct FnRequestHandler<R, F> {
    f: F,
    _request: PhantomData<fn(R)>,
}

impl<R, F> FnRequestHandler<R, F> {
    /// Wrap a closure.
    #[must_use]
    pub const fn new(f: F) -> Self {
        Self {
            f,
            _request: PhantomData,
        }
    }
}

impl<R, F, Fut> RequestHandler<R> for FnRequestHandler<R, F>
where
    R: Request,
    F: Fn(R, Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Outcome<R::Response>> + Send + 'static,
{
    fn handle<'a>(&'a self, request: R, ctx: &'a Context) -> BoxFuture<'a, Outcome<R::Response>> {
        Box::pin((self.f)(request, ctx.clone()))
    }
}

/// Adapts an async closure into an [`EventHandler`].
///
/// The closure receives a clone of the event, so `E: Clone` is required.
pub struct FnEventHandler<E, F> {
    name: &'static str,
    f: F,
    _event: PhantomData<fn(E)>,
}

impl<E, F> FnEventHandler<E, F> {
    /// Wrap a closure under the given handler name.
    #[must_use]
    pub const fn new(name: &'static str, f: F) -> Self {
        Self {
            name,
            f,
            _event: PhantomData,
        }
    }
}

impl<E, F, Fut> EventHandler<E> for FnEventHandler<E, F>
where
    E: Event + Clone,
    F: Fn(E, Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Outcome<()>> + Send + 'static,
{
    fn handle<'a>(&'a self, event: &'a E, ctx: &'a Context) -> BoxFuture<'a, Outcome<()>> {
        Box::pin((self.f)(event.clone(), ctx.clone()))
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::Reason;

    struct Double(u32);

    impl Request for Double {
        type Response = u32;
    }

    #[derive(Clone)]
    struct Ping;

    impl Event for Ping {
        fn event_type(&self) -> &'static str {
            "Ping.v1"
        }
    }

    #[tokio::test]
    async fn fn_request_handler_runs_closure() {
        let handler = FnRequestHandler::new(|request: Double, _ctx: Context| async move {
            Outcome::success(request.0 * 2)
        });
        let ctx = Context::root();

        let outcome = handler.handle(Double(21), &ctx).await;
        assert_eq!(outcome.into_value(), Some(42));
    }

    #[tokio::test]
    async fn fn_event_handler_reports_its_name() {
        let handler = FnEventHandler::new("ping-rejecter", |_event: Ping, _ctx: Context| async {
            Outcome::<()>::failure(Reason::rejected("no"))
        });
        let ctx = Context::root();

        assert_eq!(EventHandler::<Ping>::name(&handler), "ping-rejecter");
        assert!(handler.handle(&Ping, &ctx).await.is_failure());
    }
}
