//! Pipeline behavior chain.
//!
//! A pipeline wraps a request handler in an ordered list of behaviors. The
//! chain is composed once, at registration, by folding the behaviors
//! right-to-left around the terminal handler: the first registered behavior is
//! the outermost. Behaviors therefore run in registration order on the way in
//! and unwind in reverse order on the way out.
//!
//! A behavior short-circuits by returning an outcome without calling
//! [`Next::run`].
//!
//! # Example
//!
//! ```ignore
//! let pipeline = PipelineBuilder::<CreateOrder>::new()
//!     .behavior(TracingBehavior::new())
//!     .behavior(PolicyBehavior::new(RetryPolicy::new(3)))
//!     .handler(CreateOrderHandler);
//!
//! registry.request::<CreateOrder>(pipeline);
//! ```

use crate::context::Context;
use crate::handler::RequestHandler;
use crate::outcome::Outcome;
use crate::request::Request;
use futures::future::BoxFuture;
use std::sync::Arc;

type Invoke<R> = Arc<
    dyn Fn(R, Context) -> BoxFuture<'static, Outcome<<R as Request>::Response>> + Send + Sync,
>;

/// The remainder of the chain, handed to each behavior.
pub struct Next<R: Request> {
    invoke: Invoke<R>,
}

impl<R: Request> Clone for Next<R> {
    fn clone(&self) -> Self {
        Self {
            invoke: Arc::clone(&self.invoke),
        }
    }
}

impl<R: Request> Next<R> {
    /// Invoke the next stage (another behavior or the handler).
    pub async fn run(self, request: R, ctx: &Context) -> Outcome<R::Response> {
        (self.invoke)(request, ctx.clone()).await
    }
}

/// Middleware around a request handler invocation.
pub trait PipelineBehavior<R: Request>: Send + Sync + 'static {
    /// Run code around `next`. May return without calling it.
    fn handle<'a>(
        &'a self,
        request: R,
        ctx: &'a Context,
        next: Next<R>,
    ) -> BoxFuture<'a, Outcome<R::Response>>;
}

/// Collects behaviors for one request type, then closes the chain with a
/// handler.
pub struct PipelineBuilder<R: Request> {
    behaviors: Vec<Arc<dyn PipelineBehavior<R>>>,
}

impl<R: Request> Default for PipelineBuilder<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Request> PipelineBuilder<R> {
    /// An empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self {
            behaviors: Vec::new(),
        }
    }

    /// Append a behavior. Earlier behaviors wrap later ones.
    #[must_use]
    pub fn behavior(mut self, behavior: impl PipelineBehavior<R>) -> Self {
        self.behaviors.push(Arc::new(behavior));
        self
    }

    /// Number of behaviors registered so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.behaviors.len()
    }

    /// Whether no behavior has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.behaviors.is_empty()
    }

    /// Close the chain around the terminal handler.
    #[must_use]
    pub fn handler(self, handler: impl RequestHandler<R>) -> Pipeline<R> {
        let handler: Arc<dyn RequestHandler<R>> = Arc::new(handler);

        let terminal: Invoke<R> = Arc::new(
            move |request: R, ctx: Context| -> BoxFuture<'static, Outcome<R::Response>> {
                let handler = Arc::clone(&handler);
                Box::pin(async move { handler.handle(request, &ctx).await })
            },
        );

        let invoke = self
            .behaviors
            .into_iter()
            .rev()
            .fold(terminal, |inner, behavior| -> Invoke<R> {
                Arc::new(
                    move |request: R, ctx: Context| -> BoxFuture<'static, Outcome<R::Response>> {
                        let behavior = Arc::clone(&behavior);
                        let next = Next {
                            invoke: Arc::clone(&inner),
                        };
                        Box::pin(async move { behavior.handle(request, &ctx, next).await })
                    },
                )
            });

        Pipeline { invoke }
    }
}

/// A composed chain. Itself a [`RequestHandler`], so it registers like any
/// other handler.
pub struct Pipeline<R: Request> {
    invoke: Invoke<R>,
}

impl<R: Request> Clone for Pipeline<R> {
    fn clone(&self) -> Self {
        Self {
            invoke: Arc::clone(&self.invoke),
        }
    }
}

impl<R: Request> RequestHandler<R> for Pipeline<R> {
    fn handle<'a>(&'a self, request: R, ctx: &'a Context) -> BoxFuture<'a, Outcome<R::Response>> {
        (self.invoke)(request, ctx.clone())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::handler::FnRequestHandler;
    use crate::outcome::Reason;
    use std::sync::Mutex;

    struct Echo(&'static str);

    impl Request for Echo {
        type Response = String;
    }

    struct Recording {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl PipelineBehavior<Echo> for Recording {
        fn handle<'a>(
            &'a self,
            request: Echo,
            ctx: &'a Context,
            next: Next<Echo>,
        ) -> BoxFuture<'a, Outcome<String>> {
            Box::pin(async move {
                self.log.lock().unwrap().push(format!("{}:in", self.name));
                let outcome = next.run(request, ctx).await;
                self.log.lock().unwrap().push(format!("{}:out", self.name));
                outcome
            })
        }
    }

    struct Gate;

    impl PipelineBehavior<Echo> for Gate {
        fn handle<'a>(
            &'a self,
            request: Echo,
            ctx: &'a Context,
            next: Next<Echo>,
        ) -> BoxFuture<'a, Outcome<String>> {
            Box::pin(async move {
                if request.0.is_empty() {
                    return Outcome::failure(Reason::rejected("empty"));
                }
                next.run(request, ctx).await
            })
        }
    }

    fn echo_handler(log: Arc<Mutex<Vec<String>>>) -> impl RequestHandler<Echo> {
        FnRequestHandler::new(move |request: Echo, _ctx: Context| {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push("handler".to_string());
                Outcome::success(request.0.to_string())
            }
        })
    }

    #[tokio::test]
    async fn behaviors_wrap_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = PipelineBuilder::<Echo>::new()
            .behavior(Recording {
                name: "first",
                log: Arc::clone(&log),
            })
            .behavior(Recording {
                name: "second",
                log: Arc::clone(&log),
            })
            .handler(echo_handler(Arc::clone(&log)));

        let ctx = Context::root();
        let outcome = pipeline.handle(Echo("hi"), &ctx).await;

        assert_eq!(outcome.into_value().as_deref(), Some("hi"));
        assert_eq!(
            *log.lock().unwrap(),
            vec!["first:in", "second:in", "handler", "second:out", "first:out"]
        );
    }

    #[tokio::test]
    async fn short_circuit_skips_handler() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = PipelineBuilder::<Echo>::new()
            .behavior(Recording {
                name: "outer",
                log: Arc::clone(&log),
            })
            .behavior(Gate)
            .handler(echo_handler(Arc::clone(&log)));

        let ctx = Context::root();
        let outcome = pipeline.handle(Echo(""), &ctx).await;

        assert!(outcome.is_failure());
        assert_eq!(*log.lock().unwrap(), vec!["outer:in", "outer:out"]);
    }

    #[test]
    fn empty_chain_calls_handler_directly() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let builder = PipelineBuilder::<Echo>::new();
        assert!(builder.is_empty());

        let pipeline = builder.handler(echo_handler(Arc::clone(&log)));
        let ctx = Context::root();

        let outcome = tokio_test::block_on(pipeline.handle(Echo("x"), &ctx));
        assert!(outcome.is_success());
        assert_eq!(*log.lock().unwrap(), vec!["handler"]);
    }
}
